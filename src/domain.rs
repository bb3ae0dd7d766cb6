use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HicbandError;

/// Genomic bin size in base pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resolution(u64);

impl Resolution {
    pub fn new(bp: u64) -> Result<Self, HicbandError> {
        if bp == 0 {
            return Err(HicbandError::InvalidResolution("0".to_string()));
        }
        Ok(Self(bp))
    }

    pub fn bp(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Resolution {
    type Err = HicbandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed.strip_suffix("bp").unwrap_or(trimmed);
        let bp = digits
            .parse::<u64>()
            .map_err(|_| HicbandError::InvalidResolution(value.to_string()))?;
        Self::new(bp).map_err(|_| HicbandError::InvalidResolution(value.to_string()))
    }
}

/// Dataset identifier (typically an SRA run id), used as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = HicbandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = !normalized.is_empty()
            && !normalized.starts_with('.')
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid {
            return Err(HicbandError::InvalidDatasetId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Chromosome name in canonical UCSC form (`chr` prefix), safe as an archive
/// key and file name component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChromName(String);

impl ChromName {
    /// Canonicalizes a name reported by a matrix source: `1` becomes `chr1`,
    /// `chrX` is kept as is.
    pub fn canonical(raw: &str) -> Result<Self, HicbandError> {
        let trimmed = raw.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\', '\0']);
        if !is_valid {
            return Err(HicbandError::InvalidChromosomeName(raw.to_string()));
        }
        if trimmed.starts_with("chr") {
            Ok(Self(trimmed.to_string()))
        } else {
            Ok(Self(format!("chr{trimmed}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChromName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// One archive per dataset, keys `{resolution}/{chrom}/{offset}`.
    Dataset,
    /// One archive per chromosome under `{resolution}/`, keys `{offset}`.
    Chromosome,
    /// One archive per chromosome/resolution/window, `{chrom}_{res}bp_{w}win.npz`.
    Resolution,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Dataset => write!(f, "dataset"),
            Layout::Chromosome => write!(f, "chromosome"),
            Layout::Resolution => write!(f, "resolution"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Stored,
    Deflated,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Stored => write!(f, "stored"),
            Compression::Deflated => write!(f, "deflated"),
        }
    }
}
