use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hicband::app::App;
use hicband::catalog::Selection;
use hicband::config::{ConfigLoader, ConfigOverrides};
use hicband::domain::{Compression, DatasetId, Layout, Resolution};
use hicband::error::HicbandError;
use hicband::npz::{self, NpzWriter};
use hicband::output::{self, InspectEntry, JsonOutput, LogSink, OutputMode};
use hicband::source;

#[derive(Parser)]
#[command(name = "hicband")]
#[command(about = "Extract diagonal bands from Hi-C contact matrices into NumPy .npz archives")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert a dataset into diagonal-band archives")]
    Convert(ConvertArgs),
    #[command(about = "List the resolutions available in a dataset")]
    Resolutions(DatasetArgs),
    #[command(about = "List the keys of an .npz archive")]
    Inspect(InspectArgs),
}

#[derive(Args)]
struct ConvertArgs {
    /// Dataset identifier, e.g. an SRA run accession
    dataset: String,

    /// Process only this resolution (bin size in bp)
    #[arg(long, short, conflicts_with = "all")]
    resolution: Option<String>,

    /// Process every resolution in the dataset (default)
    #[arg(long)]
    all: bool,

    /// Number of diagonals on each side of the main diagonal [default: 128]
    #[arg(long, short)]
    window: Option<usize>,

    /// Apply balancing weights (default)
    #[arg(long, conflicts_with = "no_balance")]
    balance: bool,

    /// Use raw counts
    #[arg(long)]
    no_balance: bool,

    #[arg(long, value_enum)]
    layout: Option<Layout>,

    /// Deflate archive members (like numpy.savez_compressed)
    #[arg(long)]
    compress: bool,

    #[arg(long)]
    data_root: Option<String>,

    #[arg(long)]
    output_root: Option<String>,
}

#[derive(Args)]
struct DatasetArgs {
    dataset: String,

    #[arg(long)]
    data_root: Option<String>,
}

#[derive(Args)]
struct InspectArgs {
    archive: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HicbandError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HicbandError) -> u8 {
    match error {
        HicbandError::DatasetNotFound(_)
        | HicbandError::EmptyCatalog(_)
        | HicbandError::ResolutionNotFound { .. }
        | HicbandError::InvalidDatasetId(_)
        | HicbandError::InvalidResolution(_) => 2,
        HicbandError::ArchiveWrite { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Convert(args) => run_convert(args, cli.config.as_deref(), output_mode),
        Commands::Resolutions(args) => run_resolutions(args, cli.config.as_deref(), output_mode),
        Commands::Inspect(args) => run_inspect(args, output_mode),
    }
}

fn run_convert(
    args: ConvertArgs,
    config_path: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let dataset_id = args.dataset.parse::<DatasetId>()?;
    let overrides = build_overrides(&args)?;
    let config = ConfigLoader::resolve(config_path, overrides)?;

    let dataset = source::open_dataset(&config.data_root, &dataset_id, Some(config.window))?;
    let app = App::new(dataset, NpzWriter::new(config.compression));

    let summary = match output_mode {
        OutputMode::NonInteractive => {
            let summary = app.run(&config, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
            summary
        }
        OutputMode::Interactive => {
            let summary = app.run(&config, &LogSink)?;
            output::print_summary(&summary);
            summary
        }
    };

    if let Some(failed) = summary.failed_archives.first() {
        return Err(HicbandError::ArchiveWrite {
            path: failed.path.clone(),
            reason: format!(
                "{} ({} archive(s) failed in total)",
                failed.reason,
                summary.failed_archives.len()
            ),
        }
        .into());
    }
    Ok(())
}

fn build_overrides(args: &ConvertArgs) -> Result<ConfigOverrides, HicbandError> {
    let selection = match (&args.resolution, args.all) {
        (Some(value), _) => Some(Selection::One(value.parse::<Resolution>()?)),
        (None, true) => Some(Selection::All),
        (None, false) => None,
    };
    let balance = if args.no_balance {
        Some(false)
    } else if args.balance {
        Some(true)
    } else {
        None
    };

    Ok(ConfigOverrides {
        data_root: args.data_root.as_deref().map(Utf8PathBuf::from),
        output_root: args.output_root.as_deref().map(Utf8PathBuf::from),
        window: args.window,
        balance,
        layout: args.layout,
        compression: args.compress.then_some(Compression::Deflated),
        selection,
    })
}

fn run_resolutions(
    args: DatasetArgs,
    config_path: Option<&str>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let dataset_id = args.dataset.parse::<DatasetId>()?;
    let overrides = ConfigOverrides {
        data_root: args.data_root.as_deref().map(Utf8PathBuf::from),
        ..ConfigOverrides::default()
    };
    let config = ConfigLoader::resolve(config_path, overrides)?;
    let dataset = source::open_dataset(&config.data_root, &dataset_id, None)?;
    let resolutions = App::new(dataset, NpzWriter::default()).resolutions()?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_resolutions(&resolutions).into_diagnostic(),
        OutputMode::Interactive => {
            output::print_resolutions(&resolutions);
            Ok(())
        }
    }
}

fn run_inspect(args: InspectArgs, output_mode: OutputMode) -> miette::Result<()> {
    let entries = npz::read_npz(Utf8Path::new(&args.archive))?;
    let entries: Vec<InspectEntry> = entries.iter().map(InspectEntry::from).collect();
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_inspect(&entries).into_diagnostic(),
        OutputMode::Interactive => {
            output::print_inspect(&entries);
            Ok(())
        }
    }
}
