use miette::Diagnostic;
use thiserror::Error;

use crate::domain::Resolution;

#[derive(Debug, Error, Diagnostic)]
pub enum HicbandError {
    #[error("invalid dataset identifier: {0}")]
    InvalidDatasetId(String),

    #[error("invalid chromosome name: {0:?}")]
    InvalidChromosomeName(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("dataset not found: {0}")]
    #[diagnostic(help(
        "expected <data_root>/<dataset>/cooler/<dataset>.mcool or <data_root>/<dataset>/dump/"
    ))]
    DatasetNotFound(String),

    #[error("dataset {0} has no resolutions")]
    EmptyCatalog(String),

    #[error("resolution {requested} not available (available: {})", format_resolutions(.available))]
    ResolutionNotFound {
        requested: Resolution,
        available: Vec<Resolution>,
    },

    #[error("failed to fetch chromosome {chrom} at {resolution}: {reason}")]
    ChromosomeFetch {
        chrom: String,
        resolution: Resolution,
        reason: String,
    },

    #[error("failed to write archive {path}: {reason}")]
    ArchiveWrite { path: String, reason: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("matrix source error: {0}")]
    Source(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("unsupported dataset format: {0}")]
    UnsupportedFormat(String),

    #[error("processing cancelled")]
    Cancelled,
}

fn format_resolutions(resolutions: &[Resolution]) -> String {
    if resolutions.is_empty() {
        return "none".to_string();
    }
    resolutions
        .iter()
        .map(|res| res.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
