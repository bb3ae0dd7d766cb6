//! Matrix source over HDF5 cooler containers (`.mcool` and single-resolution
//! `.cool`).
//!
//! Per resolution the container holds `chroms/name`, `bins/weight`,
//! `pixels/{bin1_id,bin2_id,count}` (upper triangle, sorted by `bin1_id`) and
//! the `indexes/{chrom_offset,bin1_offset}` lookup tables.

use camino::Utf8PathBuf;
use hdf5::types::FixedAscii;
use tracing::debug;

use crate::domain::{DatasetId, Resolution};
use crate::error::HicbandError;
use crate::matrix::SparseMatrix;
use crate::source::{Dataset, MatrixSource};

const PIXEL_CHUNK: usize = 1 << 20;

fn h5_err(err: hdf5::Error) -> HicbandError {
    HicbandError::Source(err.to_string())
}

#[derive(Debug)]
pub struct CoolerDataset {
    id: DatasetId,
    path: Utf8PathBuf,
    file: hdf5::File,
    band_limit: Option<usize>,
}

impl CoolerDataset {
    pub fn open(id: DatasetId, path: Utf8PathBuf) -> Result<Self, HicbandError> {
        let file = hdf5::File::open(path.as_std_path())
            .map_err(|err| HicbandError::DatasetNotFound(format!("{path}: {err}")))?;
        Ok(Self {
            id,
            path,
            file,
            band_limit: None,
        })
    }

    pub fn with_band_limit(mut self, band_limit: Option<usize>) -> Self {
        self.band_limit = band_limit;
        self
    }

    fn is_multi_resolution(&self) -> bool {
        self.file.link_exists("resolutions")
    }

    fn single_bin_size(&self) -> Result<Resolution, HicbandError> {
        let bin_size: u64 = self
            .file
            .attr("bin-size")
            .and_then(|attr| attr.read_scalar())
            .map_err(h5_err)?;
        Resolution::new(bin_size)
    }
}

impl Dataset for CoolerDataset {
    type Source = CoolerSource;

    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn list_resolutions(&self) -> Result<Vec<Resolution>, HicbandError> {
        if !self.is_multi_resolution() {
            return Ok(vec![self.single_bin_size()?]);
        }
        let names = self
            .file
            .group("resolutions")
            .and_then(|group| group.member_names())
            .map_err(h5_err)?;
        let mut resolutions = names
            .iter()
            .filter_map(|name| name.parse::<Resolution>().ok())
            .collect::<Vec<_>>();
        resolutions.sort();
        resolutions.dedup();
        Ok(resolutions)
    }

    fn open_resolution(&self, resolution: Resolution) -> Result<CoolerSource, HicbandError> {
        let group = if self.is_multi_resolution() {
            self.file
                .group(&format!("resolutions/{resolution}"))
                .map_err(h5_err)?
        } else {
            if self.single_bin_size()? != resolution {
                return Err(HicbandError::Source(format!(
                    "{} has no resolution {resolution}",
                    self.path
                )));
            }
            self.file.as_group().map_err(h5_err)?
        };

        let chroms = group
            .dataset("chroms/name")
            .and_then(|ds| ds.read_raw::<FixedAscii<256>>())
            .map_err(h5_err)?
            .into_iter()
            .map(|name| name.as_str().to_string())
            .collect::<Vec<_>>();
        let chrom_offsets = read_offsets(&group, "indexes/chrom_offset", 0, chroms.len() + 1)?;
        debug!(%resolution, chroms = chroms.len(), "opened cooler resolution");

        Ok(CoolerSource {
            resolution,
            group,
            chroms,
            chrom_offsets,
            band_limit: self.band_limit,
        })
    }
}

#[derive(Debug)]
pub struct CoolerSource {
    resolution: Resolution,
    group: hdf5::Group,
    chroms: Vec<String>,
    chrom_offsets: Vec<usize>,
    band_limit: Option<usize>,
}

impl CoolerSource {
    fn fetch_pixels(&self, lo: usize, hi: usize) -> Result<Vec<(usize, usize, f64)>, HicbandError> {
        let bin1_offset = read_offsets(&self.group, "indexes/bin1_offset", lo, hi + 1)?;
        let (Some(&start), Some(&end)) = (bin1_offset.first(), bin1_offset.last()) else {
            return Ok(Vec::new());
        };

        let bin1_ds = self.group.dataset("pixels/bin1_id").map_err(h5_err)?;
        let bin2_ds = self.group.dataset("pixels/bin2_id").map_err(h5_err)?;
        let count_ds = self.group.dataset("pixels/count").map_err(h5_err)?;

        let mut pixels = Vec::new();
        let mut chunk_start = start;
        while chunk_start < end {
            let chunk_end = (chunk_start + PIXEL_CHUNK).min(end);
            let bin1 = bin1_ds
                .read_slice_1d::<i64, _>(chunk_start..chunk_end)
                .map_err(h5_err)?;
            let bin2 = bin2_ds
                .read_slice_1d::<i64, _>(chunk_start..chunk_end)
                .map_err(h5_err)?;
            let count = count_ds
                .read_slice_1d::<f64, _>(chunk_start..chunk_end)
                .map_err(h5_err)?;
            for ((&i, &j), &value) in bin1.iter().zip(bin2.iter()).zip(count.iter()) {
                let (i, j) = (i as usize, j as usize);
                if j < lo || j >= hi {
                    continue;
                }
                if self.band_limit.is_some_and(|limit| j.abs_diff(i) > limit) {
                    continue;
                }
                pixels.push((i - lo, j - lo, value));
            }
            chunk_start = chunk_end;
        }
        Ok(pixels)
    }
}

impl MatrixSource for CoolerSource {
    type Matrix = SparseMatrix;

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn chromosome_names(&self) -> Result<Vec<String>, HicbandError> {
        Ok(self.chroms.clone())
    }

    fn fetch_matrix(&self, chrom: &str, balance: bool) -> Result<SparseMatrix, HicbandError> {
        let fetch_err = |reason: String| HicbandError::ChromosomeFetch {
            chrom: chrom.to_string(),
            resolution: self.resolution,
            reason,
        };
        let index = self
            .chroms
            .iter()
            .position(|name| name == chrom)
            .ok_or_else(|| fetch_err("chromosome not present in container".to_string()))?;
        let (lo, hi) = (self.chrom_offsets[index], self.chrom_offsets[index + 1]);

        let pixels = self
            .fetch_pixels(lo, hi)
            .map_err(|err| fetch_err(err.to_string()))?;
        let matrix = SparseMatrix::from_upper_triangle(hi - lo, pixels)
            .map_err(|err| fetch_err(err.to_string()))?;
        if !balance {
            return Ok(matrix);
        }

        let weights = self
            .group
            .dataset("bins/weight")
            .and_then(|ds| ds.read_slice_1d::<f64, _>(lo..hi))
            .map_err(|err| fetch_err(format!("no balancing weights: {err}")))?;
        matrix
            .with_weights(weights.to_vec())
            .map_err(|err| fetch_err(err.to_string()))
    }
}

fn read_offsets(
    group: &hdf5::Group,
    name: &str,
    lo: usize,
    hi: usize,
) -> Result<Vec<usize>, HicbandError> {
    let values = group
        .dataset(name)
        .and_then(|ds| ds.read_slice_1d::<i64, _>(lo..hi))
        .map_err(h5_err)?;
    values
        .iter()
        .map(|&value| {
            usize::try_from(value)
                .map_err(|_| HicbandError::Source(format!("negative offset in {name}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use camino::Utf8Path;

    use super::*;
    use crate::matrix::ContactMatrix;

    struct ResolutionFixture<'a> {
        bp: u64,
        chroms: &'a [&'a str],
        chrom_offset: &'a [i64],
        weights: &'a [f64],
        pixels: &'a [(i64, i64, i32)],
    }

    fn write_resolution(parent: &hdf5::Group, fixture: &ResolutionFixture<'_>) {
        let group = parent.create_group(&fixture.bp.to_string()).unwrap();
        let names: Vec<FixedAscii<256>> = fixture
            .chroms
            .iter()
            .map(|name| FixedAscii::from_ascii(name.as_bytes()).unwrap())
            .collect();
        group
            .create_group("chroms")
            .unwrap()
            .new_dataset_builder()
            .with_data(names.as_slice())
            .create("name")
            .unwrap();
        group
            .create_group("bins")
            .unwrap()
            .new_dataset_builder()
            .with_data(fixture.weights)
            .create("weight")
            .unwrap();

        let bin1: Vec<i64> = fixture.pixels.iter().map(|p| p.0).collect();
        let bin2: Vec<i64> = fixture.pixels.iter().map(|p| p.1).collect();
        let count: Vec<i32> = fixture.pixels.iter().map(|p| p.2).collect();
        let pixels = group.create_group("pixels").unwrap();
        for (name, data) in [("bin1_id", &bin1), ("bin2_id", &bin2)] {
            pixels
                .new_dataset_builder()
                .with_data(data.as_slice())
                .create(name)
                .unwrap();
        }
        pixels
            .new_dataset_builder()
            .with_data(count.as_slice())
            .create("count")
            .unwrap();

        let n_bins = fixture.weights.len();
        let mut bin1_offset = vec![0i64; n_bins + 1];
        for &(i, _, _) in fixture.pixels {
            bin1_offset[i as usize + 1] += 1;
        }
        for bin in 0..n_bins {
            bin1_offset[bin + 1] += bin1_offset[bin];
        }
        let indexes = group.create_group("indexes").unwrap();
        indexes
            .new_dataset_builder()
            .with_data(fixture.chrom_offset)
            .create("chrom_offset")
            .unwrap();
        indexes
            .new_dataset_builder()
            .with_data(bin1_offset.as_slice())
            .create("bin1_offset")
            .unwrap();
    }

    /// Two resolutions; chr2 precedes chr1 and the fine resolution holds a
    /// trans pixel (chr2 bin 0 with chr1 bin 1).
    fn write_mcool(path: &Utf8Path) {
        let file = hdf5::File::create(path.as_std_path()).unwrap();
        let resolutions = file.create_group("resolutions").unwrap();
        write_resolution(
            &resolutions,
            &ResolutionFixture {
                bp: 1000,
                chroms: &["chr2", "chr1"],
                chrom_offset: &[0, 2, 5],
                weights: &[1.0, 0.5, 2.0, f64::NAN, 1.0],
                pixels: &[
                    (0, 0, 4),
                    (0, 1, 2),
                    (0, 3, 9),
                    (1, 1, 8),
                    (2, 2, 3),
                    (2, 4, 7),
                    (3, 4, 1),
                ],
            },
        );
        write_resolution(
            &resolutions,
            &ResolutionFixture {
                bp: 5000,
                chroms: &["chr2", "chr1"],
                chrom_offset: &[0, 1, 2],
                weights: &[1.0, 1.0],
                pixels: &[(0, 0, 5), (1, 1, 6)],
            },
        );
    }

    fn open(band_limit: Option<usize>) -> (tempfile::TempDir, CoolerDataset) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("SRR1.mcool")).unwrap();
        write_mcool(&path);
        let dataset = CoolerDataset::open("SRR1".parse().unwrap(), path)
            .unwrap()
            .with_band_limit(band_limit);
        (temp, dataset)
    }

    fn res(bp: u64) -> Resolution {
        Resolution::new(bp).unwrap()
    }

    #[test]
    fn lists_resolution_groups() {
        let (_temp, dataset) = open(None);
        let resolutions = dataset.list_resolutions().unwrap();
        assert_eq!(resolutions, vec![res(1000), res(5000)]);
    }

    #[test]
    fn chromosomes_keep_container_order() {
        let (_temp, dataset) = open(None);
        let source = dataset.open_resolution(res(1000)).unwrap();
        assert_eq!(source.chromosome_names().unwrap(), vec!["chr2", "chr1"]);
    }

    #[test]
    fn raw_fetch_drops_trans_pixels() {
        let (_temp, dataset) = open(None);
        let source = dataset.open_resolution(res(1000)).unwrap();

        let chr2 = source.fetch_matrix("chr2", false).unwrap();
        assert_eq!(chr2.size(), 2);
        assert_eq!(chr2.diagonal(0), vec![4.0, 8.0]);
        assert_eq!(chr2.diagonal(1), vec![2.0]);
        assert_eq!(chr2.nnz(), 4);

        let chr1 = source.fetch_matrix("chr1", false).unwrap();
        assert_eq!(chr1.diagonal(0), vec![3.0, 0.0, 0.0]);
        assert_eq!(chr1.diagonal(-2), vec![7.0]);
        assert_eq!(chr1.diagonal(1), vec![0.0, 1.0]);

        let coarse = dataset.open_resolution(res(5000)).unwrap();
        let chr1 = coarse.fetch_matrix("chr1", false).unwrap();
        assert_eq!(chr1.diagonal(0), vec![6.0]);
    }

    #[test]
    fn balanced_fetch_applies_weights() {
        let (_temp, dataset) = open(None);
        let source = dataset.open_resolution(res(1000)).unwrap();

        let chr2 = source.fetch_matrix("chr2", true).unwrap();
        assert_eq!(chr2.diagonal(0), vec![4.0, 2.0]);
        assert_eq!(chr2.diagonal(1), vec![1.0]);

        let chr1 = source.fetch_matrix("chr1", true).unwrap();
        let main = chr1.diagonal(0);
        assert_eq!(main[0], 12.0);
        assert!(main[1].is_nan());
        assert_eq!(main[2], 0.0);
        assert_eq!(chr1.diagonal(2), vec![14.0]);
    }

    #[test]
    fn band_limit_drops_far_pixels() {
        let (_temp, dataset) = open(Some(1));
        let source = dataset.open_resolution(res(1000)).unwrap();
        let chr1 = source.fetch_matrix("chr1", false).unwrap();
        assert_eq!(chr1.nnz(), 3);
        assert_eq!(chr1.diagonal(2), vec![0.0]);
    }

    #[test]
    fn unknown_chromosome_and_resolution() {
        let (_temp, dataset) = open(None);
        assert!(dataset.open_resolution(res(2000)).is_err());
        let source = dataset.open_resolution(res(1000)).unwrap();
        assert!(matches!(
            source.fetch_matrix("chrM", false),
            Err(HicbandError::ChromosomeFetch { .. })
        ));
    }
}
