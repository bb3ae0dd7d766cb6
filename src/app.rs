use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::assembler::{ArchiveAssembler, ArchiveRecord, FailedArchive, OutputPlan};
use crate::catalog::{self, ResolutionSet};
use crate::config::RunConfig;
use crate::domain::{Compression, Layout, Resolution};
use crate::error::HicbandError;
use crate::fs_util;
use crate::npz::ArchiveWriter;
use crate::processor::{self, CancellationToken, ProcessOptions, SkippedChromosome};
use crate::source::Dataset;

pub const DTYPE: &str = "float16";
pub const OFFSET_CONVENTION: &str =
    "signed offsets -window..=window; key d holds M[k][k+d] for d >= 0 and M[k-d][k] for d < 0";

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Resolutions {
        available: Vec<Resolution>,
        selected: Vec<Resolution>,
    },
    ResolutionStarted {
        resolution: Resolution,
        index: usize,
        total: usize,
    },
    Chromosome {
        resolution: Resolution,
        index: usize,
        total: usize,
        name: String,
    },
    ResolutionFailed {
        resolution: Resolution,
        reason: String,
    },
    ArchiveWritten {
        path: String,
    },
    ArchiveFailed {
        path: String,
        reason: String,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSummary {
    pub resolution: Resolution,
    pub status: ResolutionStatus,
    pub chromosomes: Vec<String>,
    pub skipped: Vec<SkippedChromosome>,
    pub error: Option<String>,
}

/// Outcome of a run; also persisted as `manifest.json` next to the archives.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dataset: String,
    pub layout: Layout,
    pub window: usize,
    pub balance: bool,
    pub compression: Compression,
    pub dtype: &'static str,
    pub offset_convention: &'static str,
    pub created_at: String,
    pub resolutions: Vec<ResolutionSummary>,
    pub archives: Vec<ArchiveRecord>,
    pub failed_archives: Vec<FailedArchive>,
    pub manifest: Option<String>,
}

impl RunSummary {
    pub fn has_write_failures(&self) -> bool {
        !self.failed_archives.is_empty()
    }

    pub fn skipped_chromosomes(&self) -> usize {
        self.resolutions.iter().map(|res| res.skipped.len()).sum()
    }

    pub fn failed_resolutions(&self) -> usize {
        self.resolutions
            .iter()
            .filter(|res| res.status == ResolutionStatus::Failed)
            .count()
    }
}

pub struct App<D: Dataset, W: ArchiveWriter> {
    dataset: D,
    writer: W,
    cancel: CancellationToken,
}

impl<D: Dataset, W: ArchiveWriter> App<D, W> {
    pub fn new(dataset: D, writer: W) -> Self {
        Self {
            dataset,
            writer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resolutions(&self) -> Result<ResolutionSet, HicbandError> {
        catalog::discover(&self.dataset)
    }

    /// Converts the selected resolutions of the dataset into archives.
    ///
    /// Catalog and selection errors abort before anything is fetched. A
    /// resolution that cannot be opened or listed is recorded as failed, a
    /// chromosome that cannot be fetched is recorded as skipped, and a failed
    /// archive write is recorded without touching other archives.
    pub fn run(
        &self,
        config: &RunConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, HicbandError> {
        let available = catalog::discover(&self.dataset)?;
        let selected = catalog::select(&available, &config.selection)?;
        sink.event(ProgressEvent::Resolutions {
            available: available.as_slice().to_vec(),
            selected: selected.as_slice().to_vec(),
        });

        let plan = OutputPlan::new(
            &config.output_root,
            self.dataset.id(),
            config.layout,
            config.window,
        );
        fs_util::ensure_dir(plan.dir())?;
        let manifest_path = plan.manifest_path();
        let mut assembler = ArchiveAssembler::new(plan, &self.writer);
        let options = ProcessOptions {
            window: config.window,
            balance: config.balance,
        };

        let mut resolutions = Vec::with_capacity(selected.len());
        for (index, resolution) in selected.iter().enumerate() {
            self.cancel.check()?;
            info!(
                %resolution,
                window = config.window,
                balance = config.balance,
                "processing resolution"
            );
            sink.event(ProgressEvent::ResolutionStarted {
                resolution,
                index: index + 1,
                total: selected.len(),
            });

            let outcome = self
                .dataset
                .open_resolution(resolution)
                .and_then(|source| {
                    processor::process_resolution(&source, options, sink, &self.cancel)
                });
            match outcome {
                Ok(bands) => {
                    info!(
                        %resolution,
                        chromosomes = bands.bands.len(),
                        skipped = bands.skipped.len(),
                        "resolution completed"
                    );
                    resolutions.push(ResolutionSummary {
                        resolution,
                        status: ResolutionStatus::Completed,
                        chromosomes: bands.chromosomes().map(|c| c.to_string()).collect(),
                        skipped: bands.skipped.clone(),
                        error: None,
                    });
                    assembler.absorb(bands, sink);
                }
                Err(HicbandError::Cancelled) => return Err(HicbandError::Cancelled),
                Err(err) => {
                    warn!(%resolution, error = %err, "resolution failed");
                    sink.event(ProgressEvent::ResolutionFailed {
                        resolution,
                        reason: err.to_string(),
                    });
                    resolutions.push(ResolutionSummary {
                        resolution,
                        status: ResolutionStatus::Failed,
                        chromosomes: Vec::new(),
                        skipped: Vec::new(),
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let report = assembler.finish(sink);
        let mut summary = RunSummary {
            dataset: self.dataset.id().to_string(),
            layout: config.layout,
            window: config.window,
            balance: config.balance,
            compression: config.compression,
            dtype: DTYPE,
            offset_convention: OFFSET_CONVENTION,
            created_at: Utc::now().to_rfc3339(),
            resolutions,
            archives: report.written,
            failed_archives: report.failed,
            manifest: None,
        };

        let manifest = serde_json::to_vec_pretty(&summary)
            .map_err(|err| HicbandError::Filesystem(err.to_string()))?;
        match fs_util::write_bytes_atomic(&manifest_path, &manifest) {
            Ok(()) => summary.manifest = Some(manifest_path.to_string()),
            Err(err) => summary.failed_archives.push(FailedArchive {
                path: manifest_path.to_string(),
                reason: err.to_string(),
            }),
        }
        Ok(summary)
    }
}
