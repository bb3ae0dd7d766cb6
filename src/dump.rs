//! Matrix source over the text tables written by `cooler dump`.
//!
//! A dataset directory holds one sub-directory per resolution:
//!
//! ```text
//! dump/
//!   5000/
//!     bins.tsv        chrom  start  end  [weight]
//!     pixels.tsv.gz   bin1_id  bin2_id  count
//! ```
//!
//! Pixels are the upper triangle (`bin1_id <= bin2_id`) sorted by `bin1_id`,
//! as `cooler dump -t pixels` emits them. A leading header line (written by
//! `cooler dump --header`) is skipped.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Lines};
use std::ops::Range;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::domain::{DatasetId, Resolution};
use crate::error::HicbandError;
use crate::matrix::SparseMatrix;
use crate::source::{Dataset, MatrixSource};

pub const BINS_FILE: &str = "bins.tsv";
pub const PIXELS_FILE: &str = "pixels.tsv";

#[derive(Debug, Clone)]
pub struct DumpDataset {
    id: DatasetId,
    root: Utf8PathBuf,
    band_limit: Option<usize>,
}

impl DumpDataset {
    pub fn open(id: DatasetId, root: Utf8PathBuf) -> Result<Self, HicbandError> {
        if !root.as_std_path().is_dir() {
            return Err(HicbandError::DatasetNotFound(root.to_string()));
        }
        Ok(Self {
            id,
            root,
            band_limit: None,
        })
    }

    pub fn with_band_limit(mut self, band_limit: Option<usize>) -> Self {
        self.band_limit = band_limit;
        self
    }
}

impl Dataset for DumpDataset {
    type Source = DumpSource;

    fn id(&self) -> &DatasetId {
        &self.id
    }

    fn list_resolutions(&self) -> Result<Vec<Resolution>, HicbandError> {
        let entries = fs::read_dir(self.root.as_std_path())
            .map_err(|err| HicbandError::Source(format!("read {}: {err}", self.root)))?;
        let mut resolutions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| HicbandError::Source(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match resolution_dir(name) {
                Some(res) => resolutions.push(res),
                None => debug!(entry = name, "ignoring non-resolution directory"),
            }
        }
        resolutions.sort();
        Ok(resolutions)
    }

    fn open_resolution(&self, resolution: Resolution) -> Result<DumpSource, HicbandError> {
        let dir = self.root.join(resolution.to_string());
        let bins = read_bins(&dir.join(BINS_FILE))?;
        let pixels_path = [PIXELS_FILE.to_string(), format!("{PIXELS_FILE}.gz")]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.as_std_path().is_file())
            .ok_or_else(|| HicbandError::Source(format!("no {PIXELS_FILE}[.gz] in {dir}")))?;
        Ok(DumpSource {
            resolution,
            bins,
            pixels_path,
            band_limit: self.band_limit,
            cursor: RefCell::new(None),
        })
    }
}

/// Parses a resolution directory name. Only the plain decimal form that
/// `open_resolution` rebuilds is accepted, so `5000bp` or `05000` are not
/// listed.
fn resolution_dir(name: &str) -> Option<Resolution> {
    let bp = name.parse::<u64>().ok()?;
    if bp.to_string() != name {
        return None;
    }
    Resolution::new(bp).ok()
}

#[derive(Debug, Clone)]
struct ChromBins {
    name: String,
    range: Range<usize>,
}

#[derive(Debug, Clone, Default)]
struct BinTable {
    chroms: Vec<ChromBins>,
    weights: Option<Vec<f64>>,
}

#[derive(Debug)]
pub struct DumpSource {
    resolution: Resolution,
    bins: BinTable,
    pixels_path: Utf8PathBuf,
    band_limit: Option<usize>,
    cursor: RefCell<Option<PixelCursor>>,
}

impl DumpSource {
    /// Reads the pixels of one chromosome, relative to its first bin.
    ///
    /// Chromosomes fetched in bin order share a single pass over the pixel
    /// table. A fetch behind the cursor reopens the file.
    fn read_pixels(&self, range: &Range<usize>) -> Result<Vec<(usize, usize, f64)>, String> {
        let mut slot = self.cursor.borrow_mut();
        let mut cursor = match slot.take() {
            Some(cursor) if cursor.consumed_upto <= range.start => cursor,
            _ => PixelCursor::open(&self.pixels_path)?,
        };

        let mut pixels = Vec::new();
        while let Some((bin1, bin2, count)) = cursor.next_pixel()? {
            if bin1 >= range.end {
                cursor.pending = Some((bin1, bin2, count));
                cursor.consumed_upto = bin1;
                *slot = Some(cursor);
                return Ok(pixels);
            }
            if bin1 < range.start || bin2 < range.start || bin2 >= range.end {
                continue;
            }
            if self
                .band_limit
                .is_some_and(|limit| bin2.abs_diff(bin1) > limit)
            {
                continue;
            }
            pixels.push((bin1 - range.start, bin2 - range.start, count));
        }
        cursor.consumed_upto = range.end;
        *slot = Some(cursor);
        Ok(pixels)
    }
}

/// Forward-only reader over a pixel table.
///
/// Every row read so far has `bin1 < consumed_upto`; the first row that
/// belongs to a later chromosome is kept in `pending`.
struct PixelCursor {
    path: Utf8PathBuf,
    lines: Lines<Box<dyn BufRead>>,
    line_no: usize,
    consumed_upto: usize,
    pending: Option<(usize, usize, f64)>,
}

impl fmt::Debug for PixelCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelCursor")
            .field("path", &self.path)
            .field("line_no", &self.line_no)
            .field("consumed_upto", &self.consumed_upto)
            .finish_non_exhaustive()
    }
}

impl PixelCursor {
    fn open(path: &Utf8Path) -> Result<Self, String> {
        Ok(Self {
            path: path.to_path_buf(),
            lines: open_text(path)?.lines(),
            line_no: 0,
            consumed_upto: 0,
            pending: None,
        })
    }

    fn next_pixel(&mut self) -> Result<Option<(usize, usize, f64)>, String> {
        if let Some(pixel) = self.pending.take() {
            return Ok(Some(pixel));
        }
        for line in self.lines.by_ref() {
            let line_no = self.line_no;
            self.line_no += 1;
            let line = line.map_err(|err| format!("{}: {err}", self.path))?;
            if line.trim().is_empty() || (line_no == 0 && line.starts_with("bin1_id")) {
                continue;
            }
            return parse_pixel(&line)
                .map(Some)
                .ok_or_else(|| format!("{}:{}: malformed pixel row", self.path, line_no + 1));
        }
        Ok(None)
    }
}

fn parse_pixel(line: &str) -> Option<(usize, usize, f64)> {
    let mut fields = line.split('\t').map(str::trim);
    let bin1 = fields.next()?.parse().ok()?;
    let bin2 = fields.next()?.parse().ok()?;
    let count = fields.next()?.parse().ok()?;
    Some((bin1, bin2, count))
}

impl MatrixSource for DumpSource {
    type Matrix = SparseMatrix;

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn chromosome_names(&self) -> Result<Vec<String>, HicbandError> {
        Ok(self.bins.chroms.iter().map(|c| c.name.clone()).collect())
    }

    fn fetch_matrix(&self, chrom: &str, balance: bool) -> Result<SparseMatrix, HicbandError> {
        let fetch_err = |reason: String| HicbandError::ChromosomeFetch {
            chrom: chrom.to_string(),
            resolution: self.resolution,
            reason,
        };
        let range = self
            .bins
            .chroms
            .iter()
            .find(|c| c.name == chrom)
            .map(|c| c.range.clone())
            .ok_or_else(|| fetch_err("chromosome not present in bin table".to_string()))?;

        let pixels = self.read_pixels(&range).map_err(fetch_err)?;
        let size = range.len();
        debug!(chrom, size, pixels = pixels.len(), "fetched pixels");
        let matrix = SparseMatrix::from_upper_triangle(size, pixels)
            .map_err(|err| fetch_err(err.to_string()))?;

        if !balance {
            return Ok(matrix);
        }
        let weights = self
            .bins
            .weights
            .as_ref()
            .ok_or_else(|| fetch_err("bin table has no weight column".to_string()))?;
        matrix
            .with_weights(weights[range].to_vec())
            .map_err(|err| fetch_err(err.to_string()))
    }
}

fn open_text(path: &Utf8Path) -> Result<Box<dyn BufRead>, String> {
    let file = fs::File::open(path.as_std_path()).map_err(|err| format!("open {path}: {err}"))?;
    if path.extension() == Some("gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn read_bins(path: &Utf8Path) -> Result<BinTable, HicbandError> {
    let reader = open_text(path).map_err(HicbandError::Source)?;
    let mut table = BinTable::default();
    let mut weights = Vec::new();
    let mut has_weights = true;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| HicbandError::Source(format!("{path}: {err}")))?;
        let fields: Vec<&str> = line.split('\t').collect();
        let is_header = line_no == 0 && fields.get(1).is_some_and(|v| v.parse::<u64>().is_err());
        if line.trim().is_empty() || is_header {
            continue;
        }
        if fields.len() < 3 {
            return Err(HicbandError::Source(format!(
                "{path}:{}: expected at least 3 columns",
                line_no + 1
            )));
        }
        let bin_id = weights.len();
        match fields.get(3) {
            Some(raw) => weights.push(parse_weight(raw)),
            None => {
                has_weights = false;
                weights.push(f64::NAN);
            }
        }

        let name = fields[0];
        if let Some(last) = table.chroms.last_mut().filter(|last| last.name == name) {
            last.range.end = bin_id + 1;
            continue;
        }
        if table.chroms.iter().any(|c| c.name == name) {
            return Err(HicbandError::Source(format!(
                "{path}:{}: bins of {name} are not contiguous",
                line_no + 1
            )));
        }
        table.chroms.push(ChromBins {
            name: name.to_string(),
            range: bin_id..bin_id + 1,
        });
    }

    if has_weights && !weights.is_empty() {
        table.weights = Some(weights);
    }
    Ok(table)
}

fn parse_weight(raw: &str) -> f64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return f64::NAN;
    }
    raw.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ContactMatrix;

    fn write_dump(root: &Utf8Path, resolution: &str, bins: &str, pixels: &str) {
        let dir = root.join(resolution);
        fs::create_dir_all(dir.as_std_path()).unwrap();
        fs::write(dir.join(BINS_FILE).as_std_path(), bins).unwrap();
        fs::write(dir.join(PIXELS_FILE).as_std_path(), pixels).unwrap();
    }

    fn dataset(root: &Utf8Path) -> DumpDataset {
        DumpDataset::open("SRR1".parse().unwrap(), root.to_path_buf()).unwrap()
    }

    fn source(root: &Utf8Path) -> DumpSource {
        let resolution = Resolution::new(10).unwrap();
        dataset(root).open_resolution(resolution).unwrap()
    }

    const BINS: &str = "chrom\tstart\tend\tweight\n\
                        2\t0\t10\t1.0\n\
                        2\t10\t20\t0.5\n\
                        1\t0\t10\t2.0\n\
                        1\t10\t20\t\n\
                        1\t20\t25\t1.0\n";
    const PIXELS: &str = "0\t0\t4\n0\t1\t2\n1\t1\t8\n2\t2\t3\n2\t4\t7\n3\t4\t1\n";

    #[test]
    fn resolutions_sorted_numerically() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "5000", BINS, PIXELS);
        write_dump(&root, "10000", BINS, PIXELS);
        write_dump(&root, "1000", BINS, PIXELS);
        fs::create_dir_all(root.join("notes").as_std_path()).unwrap();
        let resolutions = dataset(&root).list_resolutions().unwrap();
        let bps: Vec<u64> = resolutions.iter().map(|r| r.bp()).collect();
        assert_eq!(bps, vec![1000, 5000, 10000]);
    }

    #[test]
    fn only_directories_that_reopen_are_listed() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "2000", BINS, PIXELS);
        write_dump(&root, "5000bp", BINS, PIXELS);
        write_dump(&root, "010000", BINS, PIXELS);
        let dataset = dataset(&root);
        let resolutions = dataset.list_resolutions().unwrap();
        assert_eq!(resolutions, vec![Resolution::new(2000).unwrap()]);
        for resolution in resolutions {
            assert!(dataset.open_resolution(resolution).is_ok());
        }
    }

    #[test]
    fn chromosomes_keep_bin_table_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "10", BINS, PIXELS);
        let source = source(&root);
        assert_eq!(source.chromosome_names().unwrap(), vec!["2", "1"]);
    }

    #[test]
    fn fetch_raw_and_balanced() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "10", BINS, PIXELS);
        let source = source(&root);

        let raw = source.fetch_matrix("1", false).unwrap();
        assert_eq!(raw.size(), 3);
        assert_eq!(raw.diagonal(0), vec![3.0, 0.0, 0.0]);
        assert_eq!(raw.diagonal(2), vec![7.0]);
        assert_eq!(raw.diagonal(-1), vec![0.0, 1.0]);

        let balanced = source.fetch_matrix("1", true).unwrap();
        let main = balanced.diagonal(0);
        assert_eq!(main[0], 12.0);
        assert!(main[1].is_nan());
        assert_eq!(main[2], 0.0);

        let first = source.fetch_matrix("2", true).unwrap();
        assert_eq!(first.diagonal(0), vec![4.0, 2.0]);
        assert_eq!(first.diagonal(1), vec![1.0]);
    }

    #[test]
    fn chromosomes_in_bin_order_share_one_pass() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "10", BINS, PIXELS);
        let source = source(&root);

        let first = source.fetch_matrix("2", false).unwrap();
        assert_eq!(first.diagonal(0), vec![4.0, 8.0]);

        // The open cursor keeps reading after the file is unlinked; only a
        // rewind has to reopen it.
        fs::remove_file(root.join("10").join(PIXELS_FILE).as_std_path()).unwrap();
        let second = source.fetch_matrix("1", false).unwrap();
        assert_eq!(second.diagonal(0), vec![3.0, 0.0, 0.0]);
        assert_eq!(second.diagonal(2), vec![7.0]);
        assert!(matches!(
            source.fetch_matrix("2", false),
            Err(HicbandError::ChromosomeFetch { .. })
        ));
    }

    #[test]
    fn band_limit_drops_far_pixels() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "10", BINS, PIXELS);
        let source = dataset(&root)
            .with_band_limit(Some(1))
            .open_resolution("10".parse().unwrap())
            .unwrap();
        let raw = source.fetch_matrix("1", false).unwrap();
        assert_eq!(raw.nnz(), 3);
        assert_eq!(raw.diagonal(2), vec![0.0]);
    }

    #[test]
    fn unknown_chromosome_and_missing_weights_fail_per_chromosome() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        write_dump(&root, "10", "1\t0\t10\n1\t10\t20\n", "0\t1\t5\n");
        let source = source(&root);
        assert!(matches!(
            source.fetch_matrix("7", false),
            Err(HicbandError::ChromosomeFetch { .. })
        ));
        assert!(matches!(
            source.fetch_matrix("1", true),
            Err(HicbandError::ChromosomeFetch { .. })
        ));
        let raw = source.fetch_matrix("1", false).unwrap();
        assert_eq!(raw.diagonal(1), vec![5.0]);
    }

    #[test]
    fn gzipped_pixels_are_read() {
        use std::io::Write;

        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let dir = root.join("10");
        fs::create_dir_all(dir.as_std_path()).unwrap();
        fs::write(dir.join(BINS_FILE).as_std_path(), "1\t0\t10\n1\t10\t20\n").unwrap();
        let file = fs::File::create(dir.join("pixels.tsv.gz").as_std_path()).unwrap();
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(b"0\t0\t2\n1\t1\t3\n").unwrap();
        encoder.finish().unwrap();

        let source = source(&root);
        let raw = source.fetch_matrix("1", false).unwrap();
        assert_eq!(raw.diagonal(0), vec![2.0, 3.0]);
    }
}
