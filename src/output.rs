use std::io::{self, Write};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink, ResolutionStatus, RunSummary};
use crate::catalog::ResolutionSet;
use crate::npz::NpyEntry;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectEntry {
    pub key: String,
    pub dtype: String,
    pub shape: Vec<usize>,
}

impl From<&NpyEntry> for InspectEntry {
    fn from(entry: &NpyEntry) -> Self {
        Self {
            key: entry.name.clone(),
            dtype: entry.descr.clone(),
            shape: entry.shape.clone(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_resolutions(resolutions: &ResolutionSet) -> io::Result<()> {
        Self::print_json(resolutions)
    }

    pub fn print_inspect(entries: &[InspectEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Reports progress through `tracing`.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Resolutions {
                available,
                selected,
            } => info!(
                available = ?available.iter().map(|r| r.bp()).collect::<Vec<_>>(),
                selected = ?selected.iter().map(|r| r.bp()).collect::<Vec<_>>(),
                "resolutions"
            ),
            ProgressEvent::ResolutionStarted {
                resolution,
                index,
                total,
            } => info!("[{index}/{total}] resolution {resolution}"),
            ProgressEvent::Chromosome {
                resolution,
                index,
                total,
                name,
            } => info!("  {resolution}bp [{index}/{total}] {name}"),
            ProgressEvent::ResolutionFailed { resolution, reason } => {
                warn!("resolution {resolution} failed: {reason}")
            }
            ProgressEvent::ArchiveWritten { path } => debug!("saved {path}"),
            ProgressEvent::ArchiveFailed { path, reason } => {
                warn!("could not save {path}: {reason}")
            }
        }
    }
}

pub fn print_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}hicband summary: {} ({} layout, window {}, {}){reset}",
        summary.dataset,
        summary.layout,
        summary.window,
        if summary.balance { "balanced" } else { "raw" }
    );
    for res in &summary.resolutions {
        match res.status {
            ResolutionStatus::Completed => println!(
                "{green}  {}bp: {} chromosomes{reset}",
                res.resolution,
                res.chromosomes.len()
            ),
            ResolutionStatus::Failed => println!(
                "{red}  {}bp: failed: {}{reset}",
                res.resolution,
                res.error.as_deref().unwrap_or("unknown error")
            ),
        }
        for skipped in &res.skipped {
            println!(
                "{yellow}    skipped {}: {}{reset}",
                skipped.name, skipped.reason
            );
        }
    }
    println!(
        "{green}  archives written: {}{reset}",
        summary.archives.len()
    );
    for failed in &summary.failed_archives {
        println!("{red}  failed {}: {}{reset}", failed.path, failed.reason);
    }
    if let Some(manifest) = &summary.manifest {
        println!("{cyan}  manifest: {manifest}{reset}");
    }
}

pub fn print_resolutions(resolutions: &ResolutionSet) {
    for res in resolutions.iter() {
        println!("{res}");
    }
}

pub fn print_inspect(entries: &[InspectEntry]) {
    for entry in entries {
        let shape = entry
            .shape
            .iter()
            .map(|dim| dim.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{}\t{}\t({shape})", entry.key, entry.dtype);
    }
}
