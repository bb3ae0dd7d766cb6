use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{error, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::band::DiagonalBand;
use crate::domain::{ChromName, DatasetId, Layout, Resolution};
use crate::npz::{ArchiveWriter, ArrayData, NamedArray};
use crate::processor::ChromosomeBands;

/// Key of the `int64` array listing the offsets stored in an archive.
pub const OFFSETS_KEY: &str = "_offsets";

/// Output locations of one dataset, all under `{output_root}/{dataset}/npz/`.
#[derive(Debug, Clone)]
pub struct OutputPlan {
    dir: Utf8PathBuf,
    dataset: DatasetId,
    layout: Layout,
    window: usize,
}

impl OutputPlan {
    pub fn new(output_root: &Utf8Path, dataset: &DatasetId, layout: Layout, window: usize) -> Self {
        Self {
            dir: output_root.join(dataset.as_str()).join("npz"),
            dataset: dataset.clone(),
            layout,
            window,
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn dataset_archive(&self) -> Utf8PathBuf {
        self.dir.join(format!("{}.npz", self.dataset))
    }

    /// Archive of one chromosome, for the per-file layouts.
    pub fn chromosome_archive(&self, resolution: Resolution, chrom: &ChromName) -> Utf8PathBuf {
        match self.layout {
            Layout::Resolution => self.dir.join(format!(
                "{chrom}_{resolution}bp_{}win.npz",
                self.window
            )),
            Layout::Chromosome | Layout::Dataset => self
                .dir
                .join(resolution.to_string())
                .join(format!("{chrom}.npz")),
        }
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.dir.join("manifest.json")
    }
}

pub fn offset_key(offset: isize) -> String {
    offset.to_string()
}

pub fn dataset_key(resolution: Resolution, chrom: &ChromName, offset: isize) -> String {
    format!("{resolution}/{chrom}/{offset}")
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveRecord {
    pub path: String,
    pub keys: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedArchive {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub written: Vec<ArchiveRecord>,
    pub failed: Vec<FailedArchive>,
}

/// Routes extracted bands into archives according to the layout.
///
/// Per-file layouts flush each resolution as soon as it is absorbed; the
/// dataset layout holds every resolution until [`ArchiveAssembler::finish`].
pub struct ArchiveAssembler<'w, W: ArchiveWriter> {
    plan: OutputPlan,
    writer: &'w W,
    pending: Vec<ChromosomeBands>,
    report: AssemblyReport,
}

impl<'w, W: ArchiveWriter> ArchiveAssembler<'w, W> {
    pub fn new(plan: OutputPlan, writer: &'w W) -> Self {
        Self {
            plan,
            writer,
            pending: Vec::new(),
            report: AssemblyReport::default(),
        }
    }

    pub fn absorb(&mut self, bands: ChromosomeBands, sink: &dyn ProgressSink) {
        if self.plan.layout == Layout::Dataset {
            self.pending.push(bands);
            return;
        }
        for (chrom, band) in &bands.bands {
            let path = self.plan.chromosome_archive(bands.resolution, chrom);
            let offsets = offsets_of(band);
            let mut arrays: Vec<NamedArray<'_>> = band
                .iter()
                .map(|(offset, values)| NamedArray::new(offset_key(offset), ArrayData::F16(values)))
                .collect();
            arrays.push(NamedArray::new(OFFSETS_KEY, ArrayData::I64(&offsets)));
            self.write(path, &arrays, sink);
        }
    }

    pub fn finish(mut self, sink: &dyn ProgressSink) -> AssemblyReport {
        if self.plan.layout == Layout::Dataset {
            let pending = std::mem::take(&mut self.pending);
            if pending.iter().any(|res| !res.bands.is_empty()) {
                let offsets: Vec<i64> = {
                    let w = self.plan.window as i64;
                    (-w..=w).collect()
                };
                let mut arrays = Vec::new();
                for resolution in &pending {
                    for (chrom, band) in &resolution.bands {
                        arrays.extend(band.iter().map(|(offset, values)| {
                            NamedArray::new(
                                dataset_key(resolution.resolution, chrom, offset),
                                ArrayData::F16(values),
                            )
                        }));
                    }
                }
                arrays.push(NamedArray::new(OFFSETS_KEY, ArrayData::I64(&offsets)));
                let path = self.plan.dataset_archive();
                self.write(path, &arrays, sink);
            }
        }
        self.report
    }

    fn write(&mut self, path: Utf8PathBuf, arrays: &[NamedArray<'_>], sink: &dyn ProgressSink) {
        match self.writer.write(&path, arrays) {
            Ok(()) => {
                info!(path = %path, keys = arrays.len(), "archive written");
                sink.event(ProgressEvent::ArchiveWritten {
                    path: path.to_string(),
                });
                self.report.written.push(ArchiveRecord {
                    path: path.to_string(),
                    keys: arrays.len(),
                });
            }
            Err(err) => {
                error!(path = %path, error = %err, "archive write failed");
                sink.event(ProgressEvent::ArchiveFailed {
                    path: path.to_string(),
                    reason: err.to_string(),
                });
                self.report.failed.push(FailedArchive {
                    path: path.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

fn offsets_of(band: &DiagonalBand) -> Vec<i64> {
    band.offsets().map(|offset| offset as i64).collect()
}

/// Writes every resolution's bands according to `plan`.
pub fn assemble_and_write<W: ArchiveWriter>(
    results: Vec<ChromosomeBands>,
    plan: OutputPlan,
    writer: &W,
    sink: &dyn ProgressSink,
) -> AssemblyReport {
    let mut assembler = ArchiveAssembler::new(plan, writer);
    for bands in results {
        assembler.absorb(bands, sink);
    }
    assembler.finish(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band;
    use crate::error::HicbandError;
    use crate::matrix::DenseMatrix;
    use crate::npz::{self, NpzWriter};

    struct Quiet;

    impl ProgressSink for Quiet {
        fn event(&self, _event: ProgressEvent) {}
    }

    struct FailingOn(&'static str);

    impl ArchiveWriter for FailingOn {
        fn write(&self, path: &Utf8Path, arrays: &[NamedArray<'_>]) -> Result<(), HicbandError> {
            if path.as_str().contains(self.0) {
                return Err(HicbandError::ArchiveWrite {
                    path: path.to_string(),
                    reason: "no space left".to_string(),
                });
            }
            NpzWriter::default().write(path, arrays)
        }
    }

    fn bands(bp: u64, chroms: &[(&str, usize)], window: usize) -> ChromosomeBands {
        let bands = chroms
            .iter()
            .map(|(name, size)| {
                let mut matrix = DenseMatrix::zeros(*size);
                for i in 0..*size {
                    matrix.set(i, i, (i + 1) as f64);
                }
                (
                    ChromName::canonical(name).unwrap(),
                    band::extract(&matrix, window),
                )
            })
            .collect();
        ChromosomeBands {
            resolution: Resolution::new(bp).unwrap(),
            bands,
            skipped: Vec::new(),
        }
    }

    fn temp_plan(layout: Layout) -> (tempfile::TempDir, OutputPlan) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let plan = OutputPlan::new(&root, &"SRR123".parse().unwrap(), layout, 1);
        (temp, plan)
    }

    fn names(path: &Utf8Path) -> Vec<String> {
        npz::read_npz(path)
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect()
    }

    fn offsets(path: &Utf8Path) -> Vec<i64> {
        npz::read_npz(path)
            .unwrap()
            .into_iter()
            .find(|entry| entry.name == OFFSETS_KEY)
            .and_then(|entry| entry.to_i64())
            .unwrap()
    }

    #[test]
    fn chromosome_layout_writes_one_archive_per_chromosome() {
        let (_temp, plan) = temp_plan(Layout::Chromosome);
        let results = vec![bands(1000, &[("1", 3), ("2", 2)], 1)];
        let report = assemble_and_write(results, plan.clone(), &NpzWriter::default(), &Quiet);

        assert_eq!(report.written.len(), 2);
        assert!(report.failed.is_empty());
        let chr1 = plan.dir().join("1000/chr1.npz");
        assert_eq!(names(&chr1), vec!["-1", "0", "1", OFFSETS_KEY]);
        assert_eq!(offsets(&chr1), vec![-1, 0, 1]);
        assert_eq!(report.written[0].keys, 4);
    }

    #[test]
    fn resolution_layout_names_files_by_window() {
        let (_temp, plan) = temp_plan(Layout::Resolution);
        let results = vec![bands(1000, &[("X", 2)], 1), bands(5000, &[("X", 2)], 1)];
        let report = assemble_and_write(results, plan.clone(), &NpzWriter::default(), &Quiet);

        assert_eq!(report.written.len(), 2);
        for file in ["chrX_1000bp_1win.npz", "chrX_5000bp_1win.npz"] {
            let path = plan.dir().join(file);
            assert_eq!(names(&path), vec!["-1", "0", "1", OFFSETS_KEY]);
        }
    }

    #[test]
    fn dataset_layout_writes_a_single_nested_archive() {
        let (_temp, plan) = temp_plan(Layout::Dataset);
        let results = vec![bands(1000, &[("1", 3)], 1), bands(5000, &[("1", 2)], 1)];
        let report = assemble_and_write(results, plan.clone(), &NpzWriter::default(), &Quiet);

        assert_eq!(report.written.len(), 1);
        let path = plan.dataset_archive();
        assert_eq!(
            names(&path),
            vec![
                "1000/chr1/-1",
                "1000/chr1/0",
                "1000/chr1/1",
                "5000/chr1/-1",
                "5000/chr1/0",
                "5000/chr1/1",
                OFFSETS_KEY,
            ]
        );
        assert_eq!(offsets(&path), vec![-1, 0, 1]);
    }

    #[test]
    fn dataset_layout_without_bands_writes_nothing() {
        let (_temp, plan) = temp_plan(Layout::Dataset);
        let results = vec![bands(1000, &[], 1)];
        let report = assemble_and_write(results, plan.clone(), &NpzWriter::default(), &Quiet);
        assert!(report.written.is_empty());
        assert!(!plan.dataset_archive().as_std_path().exists());
    }

    #[test]
    fn failed_write_is_reported_and_others_proceed() {
        let (_temp, plan) = temp_plan(Layout::Chromosome);
        let results = vec![bands(1000, &[("1", 3), ("2", 3), ("3", 3)], 1)];
        let report = assemble_and_write(results, plan.clone(), &FailingOn("chr2"), &Quiet);

        assert_eq!(report.written.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].path.ends_with("1000/chr2.npz"));
        assert!(report.failed[0].reason.contains("no space left"));
        assert!(plan.dir().join("1000/chr3.npz").as_std_path().is_file());
    }

    fn plan(layout: Layout) -> OutputPlan {
        OutputPlan::new(
            Utf8Path::new("/data/out"),
            &"SRR123".parse().unwrap(),
            layout,
            64,
        )
    }

    #[test]
    fn layout_paths() {
        let res = Resolution::new(5000).unwrap();
        let chrom = ChromName::canonical("1").unwrap();

        assert_eq!(
            plan(Layout::Dataset).dataset_archive(),
            Utf8PathBuf::from("/data/out/SRR123/npz/SRR123.npz")
        );
        assert_eq!(
            plan(Layout::Chromosome).chromosome_archive(res, &chrom),
            Utf8PathBuf::from("/data/out/SRR123/npz/5000/chr1.npz")
        );
        assert_eq!(
            plan(Layout::Resolution).chromosome_archive(res, &chrom),
            Utf8PathBuf::from("/data/out/SRR123/npz/chr1_5000bp_64win.npz")
        );
        assert_eq!(
            plan(Layout::Chromosome).manifest_path(),
            Utf8PathBuf::from("/data/out/SRR123/npz/manifest.json")
        );
    }

    #[test]
    fn keys() {
        let res = Resolution::new(1000).unwrap();
        let chrom = ChromName::canonical("chrX").unwrap();
        assert_eq!(offset_key(-3), "-3");
        assert_eq!(dataset_key(res, &chrom, 2), "1000/chrX/2");
    }
}
