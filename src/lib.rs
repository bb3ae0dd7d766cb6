//! Diagonal-band extraction for Hi-C contact matrices.
//!
//! For each resolution of a dataset and each chromosome, the band of
//! diagonals `-window..=window` around the main diagonal is extracted, cast to
//! binary16 with non-finite values zeroed, and written to NumPy `.npz`
//! archives.

pub mod app;
pub mod assembler;
pub mod band;
pub mod catalog;
#[cfg(feature = "cooler")]
pub mod cooler;
pub mod config;
pub mod domain;
pub mod dump;
pub mod error;
pub mod fs_util;
pub mod matrix;
pub mod npz;
pub mod output;
pub mod processor;
pub mod source;
