use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::domain::{DatasetId, Resolution};
use crate::dump::{DumpDataset, DumpSource};
use crate::error::HicbandError;
use crate::matrix::{ContactMatrix, SparseMatrix};

/// Contact matrices of one dataset at one resolution.
pub trait MatrixSource {
    type Matrix: ContactMatrix;

    fn resolution(&self) -> Resolution;

    /// Chromosome names in the source's native (assembly) order.
    fn chromosome_names(&self) -> Result<Vec<String>, HicbandError>;

    fn fetch_matrix(&self, chrom: &str, balance: bool) -> Result<Self::Matrix, HicbandError>;
}

/// A multi-resolution contact matrix container.
pub trait Dataset {
    type Source: MatrixSource;

    fn id(&self) -> &DatasetId;

    fn list_resolutions(&self) -> Result<Vec<Resolution>, HicbandError>;

    fn open_resolution(&self, resolution: Resolution) -> Result<Self::Source, HicbandError>;
}

/// Where a dataset lives under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLocation {
    Cooler(Utf8PathBuf),
    Dump(Utf8PathBuf),
}

/// Locates a dataset: `{root}/{id}/cooler/{id}.mcool`, `{root}/{id}/cooler/{id}.cool`
/// or `{root}/{id}/dump/`, in that order.
pub fn locate_dataset(
    data_root: &Utf8Path,
    id: &DatasetId,
) -> Result<DatasetLocation, HicbandError> {
    let dataset_dir = data_root.join(id.as_str());
    let cooler_dir = dataset_dir.join("cooler");
    for ext in ["mcool", "cool"] {
        let path = cooler_dir.join(format!("{id}.{ext}"));
        if path.as_std_path().is_file() {
            debug!(path = %path, "found cooler container");
            return Ok(DatasetLocation::Cooler(path));
        }
    }
    let dump_dir = dataset_dir.join("dump");
    if dump_dir.as_std_path().is_dir() {
        debug!(path = %dump_dir, "found cooler dump directory");
        return Ok(DatasetLocation::Dump(dump_dir));
    }
    Err(HicbandError::DatasetNotFound(format!(
        "{id} (searched {dataset_dir})"
    )))
}

/// Opens whichever container backs a dataset.
///
/// `band_limit` lets sources drop pixels further than that many bins from
/// the main diagonal while fetching.
pub fn open_dataset(
    data_root: &Utf8Path,
    id: &DatasetId,
    band_limit: Option<usize>,
) -> Result<AnyDataset, HicbandError> {
    match locate_dataset(data_root, id)? {
        DatasetLocation::Dump(dir) => Ok(AnyDataset::Dump(
            DumpDataset::open(id.clone(), dir)?.with_band_limit(band_limit),
        )),
        #[cfg(feature = "cooler")]
        DatasetLocation::Cooler(path) => Ok(AnyDataset::Cooler(
            crate::cooler::CoolerDataset::open(id.clone(), path)?.with_band_limit(band_limit),
        )),
        #[cfg(not(feature = "cooler"))]
        DatasetLocation::Cooler(path) => Err(HicbandError::UnsupportedFormat(format!(
            "{path} is an HDF5 cooler file; rebuild with `--features cooler`"
        ))),
    }
}

#[derive(Debug)]
pub enum AnyDataset {
    Dump(DumpDataset),
    #[cfg(feature = "cooler")]
    Cooler(crate::cooler::CoolerDataset),
}

#[derive(Debug)]
pub enum AnySource {
    Dump(DumpSource),
    #[cfg(feature = "cooler")]
    Cooler(crate::cooler::CoolerSource),
}

impl Dataset for AnyDataset {
    type Source = AnySource;

    fn id(&self) -> &DatasetId {
        match self {
            AnyDataset::Dump(dataset) => dataset.id(),
            #[cfg(feature = "cooler")]
            AnyDataset::Cooler(dataset) => dataset.id(),
        }
    }

    fn list_resolutions(&self) -> Result<Vec<Resolution>, HicbandError> {
        match self {
            AnyDataset::Dump(dataset) => dataset.list_resolutions(),
            #[cfg(feature = "cooler")]
            AnyDataset::Cooler(dataset) => dataset.list_resolutions(),
        }
    }

    fn open_resolution(&self, resolution: Resolution) -> Result<AnySource, HicbandError> {
        match self {
            AnyDataset::Dump(dataset) => dataset.open_resolution(resolution).map(AnySource::Dump),
            #[cfg(feature = "cooler")]
            AnyDataset::Cooler(dataset) => {
                dataset.open_resolution(resolution).map(AnySource::Cooler)
            }
        }
    }
}

impl MatrixSource for AnySource {
    type Matrix = SparseMatrix;

    fn resolution(&self) -> Resolution {
        match self {
            AnySource::Dump(source) => source.resolution(),
            #[cfg(feature = "cooler")]
            AnySource::Cooler(source) => source.resolution(),
        }
    }

    fn chromosome_names(&self) -> Result<Vec<String>, HicbandError> {
        match self {
            AnySource::Dump(source) => source.chromosome_names(),
            #[cfg(feature = "cooler")]
            AnySource::Cooler(source) => source.chromosome_names(),
        }
    }

    fn fetch_matrix(&self, chrom: &str, balance: bool) -> Result<SparseMatrix, HicbandError> {
        match self {
            AnySource::Dump(source) => source.fetch_matrix(chrom, balance),
            #[cfg(feature = "cooler")]
            AnySource::Cooler(source) => source.fetch_matrix(chrom, balance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_dataset_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let id: DatasetId = "SRR000001".parse().unwrap();
        let err = locate_dataset(&root, &id).unwrap_err();
        assert!(matches!(err, HicbandError::DatasetNotFound(_)));
    }

    #[test]
    fn cooler_file_takes_precedence_over_dump() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let id: DatasetId = "SRR000001".parse().unwrap();
        std::fs::create_dir_all(root.join("SRR000001/dump")).unwrap();
        std::fs::create_dir_all(root.join("SRR000001/cooler")).unwrap();
        std::fs::write(root.join("SRR000001/cooler/SRR000001.mcool"), b"").unwrap();
        let location = locate_dataset(&root, &id).unwrap();
        assert_eq!(
            location,
            DatasetLocation::Cooler(root.join("SRR000001/cooler/SRR000001.mcool"))
        );
    }
}
