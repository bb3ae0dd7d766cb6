use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::band::{self, DiagonalBand};
use crate::domain::{ChromName, Resolution};
use crate::error::HicbandError;
use crate::matrix::ContactMatrix;
use crate::source::MatrixSource;

/// Cooperative cancellation flag shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), HicbandError> {
        if self.is_cancelled() {
            return Err(HicbandError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub window: usize,
    pub balance: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedChromosome {
    pub name: String,
    pub reason: String,
}

/// Bands of one resolution, in the source's chromosome order.
#[derive(Debug, Clone)]
pub struct ChromosomeBands {
    pub resolution: Resolution,
    pub bands: Vec<(ChromName, DiagonalBand)>,
    pub skipped: Vec<SkippedChromosome>,
}

impl ChromosomeBands {
    pub fn get(&self, chrom: &str) -> Option<&DiagonalBand> {
        self.bands
            .iter()
            .find(|(name, _)| name.as_str() == chrom)
            .map(|(_, band)| band)
    }

    pub fn chromosomes(&self) -> impl Iterator<Item = &ChromName> {
        self.bands.iter().map(|(name, _)| name)
    }
}

/// Extracts the band of every chromosome `source` reports.
///
/// Chromosomes that cannot be fetched, whose names are unusable as keys, or
/// whose canonical name repeats an earlier one are skipped and reported.
pub fn process_resolution<S: MatrixSource>(
    source: &S,
    options: ProcessOptions,
    sink: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<ChromosomeBands, HicbandError> {
    let resolution = source.resolution();
    let names = source.chromosome_names()?;
    let total = names.len();
    let mut result = ChromosomeBands {
        resolution,
        bands: Vec::with_capacity(total),
        skipped: Vec::new(),
    };
    let mut seen = HashSet::new();

    for (index, raw) in names.iter().enumerate() {
        cancel.check()?;
        sink.event(ProgressEvent::Chromosome {
            resolution,
            index: index + 1,
            total,
            name: raw.clone(),
        });

        let skip = |reason: String| {
            warn!(%resolution, chrom = %raw, %reason, "skipping chromosome");
            SkippedChromosome {
                name: raw.clone(),
                reason,
            }
        };

        let name = match ChromName::canonical(raw) {
            Ok(name) => name,
            Err(err) => {
                result.skipped.push(skip(err.to_string()));
                continue;
            }
        };
        if !seen.insert(name.clone()) {
            result
                .skipped
                .push(skip(format!("duplicate canonical name {name}")));
            continue;
        }

        let matrix = match source.fetch_matrix(raw, options.balance) {
            Ok(matrix) => matrix,
            Err(err) => {
                result.skipped.push(skip(err.to_string()));
                continue;
            }
        };
        debug!(%resolution, chrom = %name, bins = matrix.size(), "extracting band");
        let band = band::extract(&matrix, options.window);
        drop(matrix);
        result.bands.push((name, band));
    }

    Ok(result)
}
