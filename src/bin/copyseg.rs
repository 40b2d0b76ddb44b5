//! Runs the copy-number segmentation pipeline for a tumor/normal pair.
//!
//! ```shell
//! copyseg --control normal.bam --tumor tumor.bam --reference GRCh38.fa \
//!     --centromeres centromeres.bed --targets exome.bed \
//!     --sample SJ001 --scratch-root /scratch > SJ001.segments
//! ```
//!
//! The final report is written to standard output and everything else is
//! logged to standard error. When a run fails, the run directory is left in
//! place and can be handed back with `--resume` to continue from the first
//! incomplete stage.

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use copyseg::Pipeline;
use copyseg::RunDirectory;
use copyseg::Tools;
use copyseg::pipeline::DEFAULT_SAMPLE;
use copyseg::pipeline::DEFAULT_UNDO_SD;
use copyseg::pipeline::Inputs;
use copyseg::pipeline::Settings;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_log::AsTrace as _;
use tracing_subscriber::EnvFilter;

/// Where the artifacts of the run live.
#[derive(clap::Args)]
#[group(required = true, multiple = false)]
struct Location {
    /// Starts a fresh run in a new directory created within this directory.
    #[arg(short = 't', long)]
    scratch_root: Option<PathBuf>,

    /// Resumes a previous run in this directory.
    #[arg(short = 'n', long)]
    resume: Option<PathBuf>,
}

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// The control (normal) alignment.
    #[arg(long)]
    control: PathBuf,

    /// The tumor alignment.
    #[arg(long)]
    tumor: PathBuf,

    /// The reference genome (FASTA, ideally with a `.fai` index).
    #[arg(long)]
    reference: PathBuf,

    /// The centromere annotation (BED).
    #[arg(long)]
    centromeres: PathBuf,

    /// The target annotation (BED).
    #[arg(long)]
    targets: PathBuf,

    #[command(flatten)]
    location: Location,

    /// The sample identifier used in the report and to name artifacts.
    #[arg(short, long, default_value = DEFAULT_SAMPLE)]
    sample: String,

    /// Keeps the run directory after a successful run.
    #[arg(short, long, default_value_t = false)]
    keep: bool,

    /// Only logs the commands that would be run.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// The breakpoint sensitivity of the segmentation (`undo.SD`).
    #[arg(long, default_value_t = DEFAULT_UNDO_SD)]
    undo_sd: f64,

    /// The `samtools` executable.
    #[arg(long, default_value = "samtools")]
    samtools: PathBuf,

    /// The `java` executable used to run VarScan.
    #[arg(long, default_value = "java")]
    java: PathBuf,

    /// The VarScan jar.
    #[arg(long, default_value = "VarScan.jar")]
    varscan_jar: PathBuf,

    /// The `Rscript` executable used to run the segmentation.
    #[arg(long, default_value = "Rscript")]
    rscript: PathBuf,

    /// Skips checking the versions of `samtools` and VarScan.
    #[arg(long, default_value_t = false)]
    skip_version_check: bool,

    #[command(flatten)]
    verbose: Verbosity,
}

/// Creates or reopens the run directory.
fn run_directory(args: &Args) -> Result<RunDirectory> {
    match (&args.location.scratch_root, &args.location.resume) {
        (Some(root), None) => RunDirectory::create_in(root, args.keep)
            .with_context(|| format!("creating a run directory within `{}`", root.display())),
        (None, Some(dir)) => RunDirectory::resume(dir, args.keep)
            .with_context(|| format!("resuming the run in `{}`", dir.display())),
        _ => bail!("exactly one of `--scratch-root` or `--resume` must be provided"),
    }
}

fn run(args: Args) -> Result<()> {
    let dir = run_directory(&args)?;

    let inputs = Inputs {
        control: args.control,
        tumor: args.tumor,
        reference: args.reference,
        centromeres: args.centromeres,
        targets: args.targets,
    };

    let settings = Settings {
        sample: args.sample,
        dry_run: args.dry_run,
        undo_sd: args.undo_sd,
        check_versions: !args.skip_version_check,
        tools: Tools {
            samtools: args.samtools,
            java: args.java,
            varscan_jar: args.varscan_jar,
            rscript: args.rscript,
        },
    };

    let mut pipeline = Pipeline::new(inputs, settings);
    let report = pipeline.run(&dir).with_context(|| {
        format!(
            "running the pipeline (artifacts are kept in `{}`; pass `--resume {}` to continue)",
            dir.display(),
            dir.display()
        )
    })?;

    if let Some(report) = report {
        let mut file = File::open(&report)
            .with_context(|| format!("opening the report `{}`", report.display()))?;
        let mut stdout = std::io::stdout().lock();
        std::io::copy(&mut file, &mut stdout).context("writing the report")?;
        stdout.flush().context("writing the report")?;
    }

    // NOTE: a dry run never tears down a resumed directory.
    if args.dry_run && dir.resumed() {
        return Ok(());
    }

    if let Some(path) = dir.finish().context("tearing down the run directory")? {
        info!("artifacts are in `{}`", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut level = args.verbose.log_level_filter().as_trace();
    if args.dry_run {
        level = level.max(LevelFilter::INFO);
    }

    match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init(),
    };

    run(args)
}
