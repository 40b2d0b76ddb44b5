//! The copy-number segmentation pipeline.
//!
//! A run is a fixed, linear sequence of stages:
//!
//! 1. alignment statistics for the control and tumor alignments,
//! 2. the control/tumor data ratio,
//! 3. a pileup of both alignments over the targets (followed by a check that
//!    the reference genome actually matches the alignments),
//! 4. copy-number estimation,
//! 5. filtering of the copy-number records,
//! 6. segment calling,
//! 7. recentering of the calls (the only data-dependent decision of a run),
//! 8. splitting the calls into chromosome arms,
//! 9. segmentation, and
//! 10. merging the arms back into a single report.
//!
//! Each stage writes one artifact to the run directory, and a stage whose
//! artifact is already complete is skipped. Any failure stops the run and
//! leaves every artifact in place, so rerunning against the same directory
//! resumes where the failed run stopped.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::artifact;
use crate::metrics;
use crate::metrics::AlignmentMetrics;
use crate::recenter;
use crate::recenter::Decision;
use crate::segment;
use crate::segment::Layout;
use crate::segment::SegmentRecord;
use crate::segment::arm;
use crate::segment::arm::Centromeres;
use crate::stage::Runner;
use crate::stage::Stage;
use crate::stage::TransformError;
use crate::stage::runner;
use crate::tools;
use crate::tools::Tools;
use crate::validate;
use crate::workdir::RunDirectory;

/// The default sample identifier.
pub const DEFAULT_SAMPLE: &str = "sample";

/// The default breakpoint sensitivity of the segmentation (`undo.SD`).
pub const DEFAULT_UNDO_SD: f64 = 2.0;

/// The name of the segmentation script within the run directory.
const SCRIPT_NAME: &str = "dnacopy.R";

/// The data ratio shown in place of one that cannot be computed yet during a
/// dry run.
const DRY_RUN_RATIO: &str = "<ratio>";

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to a pipeline run.
#[derive(Debug)]
pub enum Error {
    /// A required input file is missing or unreadable.
    MissingInput(&'static str, PathBuf),

    /// The sample identifier cannot be used.
    InvalidSample(String),

    /// The inputs are not consistent with the reference genome.
    Consistency(validate::Error),

    /// A required tool is missing or is not a supported version.
    ToolVersion(tools::Error),

    /// A stage failed.
    Stage(runner::Error),

    /// The data ratio could not be computed.
    Metrics(metrics::Error),

    /// The recentering decision could not be made.
    Decision(recenter::Error),

    /// The centromere annotation could not be read.
    Centromeres(arm::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingInput(name, path) => write!(
                f,
                "argument error: the {name} `{}` does not exist or is not a file",
                path.display()
            ),
            Error::InvalidSample(sample) => write!(
                f,
                "argument error: invalid sample identifier `{sample}`: it must be non-empty and \
                 cannot contain a path separator"
            ),
            Error::Consistency(err) => write!(f, "consistency error: {err}"),
            Error::ToolVersion(err) => write!(f, "tool version error: {err}"),
            Error::Stage(err) => write!(f, "{err}"),
            Error::Metrics(err) => write!(f, "ratio error: {err}"),
            Error::Decision(err) => write!(f, "recentering error: {err}"),
            Error::Centromeres(err) => write!(f, "centromere error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<runner::Error> for Error {
    fn from(err: runner::Error) -> Self {
        Error::Stage(err)
    }
}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Configuration
////////////////////////////////////////////////////////////////////////////////////////

/// The input files of a run.
#[derive(Clone, Debug)]
pub struct Inputs {
    /// The control (normal) alignment.
    pub control: PathBuf,

    /// The tumor alignment.
    pub tumor: PathBuf,

    /// The indexed reference genome.
    pub reference: PathBuf,

    /// The centromere annotation.
    pub centromeres: PathBuf,

    /// The target (e.g. exome) annotation.
    pub targets: PathBuf,
}

impl Inputs {
    /// Ensures that every input exists as a file.
    fn check_exist(&self) -> Result<()> {
        for (name, path) in [
            ("control alignment", &self.control),
            ("tumor alignment", &self.tumor),
            ("reference genome", &self.reference),
            ("centromere annotation", &self.centromeres),
            ("target annotation", &self.targets),
        ] {
            if !path.is_file() {
                return Err(Error::MissingInput(name, path.clone()));
            }
        }

        Ok(())
    }
}

/// Settings that control a run.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The sample identifier written to the report and used to name artifacts.
    pub sample: String,

    /// Whether commands are only logged rather than run.
    pub dry_run: bool,

    /// The breakpoint sensitivity of the segmentation (`undo.SD`).
    pub undo_sd: f64,

    /// Whether the versions of the external tools are checked.
    pub check_versions: bool,

    /// The external tools.
    pub tools: Tools,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample: DEFAULT_SAMPLE.to_string(),
            dry_run: false,
            undo_sd: DEFAULT_UNDO_SD,
            check_versions: true,
            tools: Tools::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Artifacts
////////////////////////////////////////////////////////////////////////////////////////

/// The location of every artifact of a run.
#[derive(Clone, Debug)]
pub struct Artifacts {
    /// The control alignment statistics.
    pub control_flagstat: PathBuf,

    /// The tumor alignment statistics.
    pub tumor_flagstat: PathBuf,

    /// The pileup of both alignments.
    pub pileup: PathBuf,

    /// The prefix handed to the copy-number estimator.
    pub copynumber_prefix: PathBuf,

    /// The copy-number estimates.
    pub copynumber: PathBuf,

    /// The filtered copy-number estimates.
    pub filtered: PathBuf,

    /// The called segments.
    pub called: PathBuf,

    /// The homozygous deletions found while calling.
    pub called_homdel: PathBuf,

    /// The recentered called segments.
    pub recentered: PathBuf,

    /// The homozygous deletions found while recentering.
    pub recentered_homdel: PathBuf,

    /// The recentered calls split into chromosome arms.
    pub arms: PathBuf,

    /// The segmentation script.
    pub script: PathBuf,

    /// The segments of each arm.
    pub segments: PathBuf,

    /// The final report.
    pub report: PathBuf,
}

impl Artifacts {
    /// Lays out the artifacts of a sample within a directory.
    pub fn new(dir: &Path, sample: &str) -> Self {
        let path = |suffix: &str| dir.join(format!("{sample}.{suffix}"));

        Self {
            control_flagstat: path("control.flagstat"),
            tumor_flagstat: path("tumor.flagstat"),
            pileup: path("pileup"),
            copynumber_prefix: dir.join(sample),
            copynumber: path("copynumber"),
            filtered: path("copynumber.filtered"),
            called: path("copynumber.called"),
            called_homdel: path("copynumber.called.homdel"),
            recentered: path("copynumber.called.recentered"),
            recentered_homdel: path("copynumber.called.recentered.homdel"),
            arms: path("copynumber.called.recentered.arms"),
            script: dir.join(SCRIPT_NAME),
            segments: path("segments"),
            report: path("segments.report"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Pipeline
////////////////////////////////////////////////////////////////////////////////////////

/// A single run of the pipeline.
#[derive(Debug)]
pub struct Pipeline {
    /// The input files.
    inputs: Inputs,

    /// The settings.
    settings: Settings,

    /// The stage runner.
    runner: Runner,
}

impl Pipeline {
    /// Creates a new pipeline.
    pub fn new(inputs: Inputs, settings: Settings) -> Self {
        let runner = Runner::new(settings.dry_run);

        Self {
            inputs,
            settings,
            runner,
        }
    }

    /// Gets the stage runner.
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Runs every stage within the run directory.
    ///
    /// Returns the location of the final report, or [`None`] for a dry run.
    pub fn run(&mut self, dir: &RunDirectory) -> Result<Option<PathBuf>> {
        let sample = self.settings.sample.clone();
        if sample.is_empty() || sample.contains(std::path::is_separator) {
            return Err(Error::InvalidSample(sample));
        }

        self.inputs.check_exist()?;

        if self.settings.check_versions {
            self.settings
                .tools
                .check_versions()
                .map_err(Error::ToolVersion)?;
        }

        let inputs = &self.inputs;
        let tools = &self.settings.tools;
        let artifacts = Artifacts::new(dir.path(), &sample);

        ////////////////////////////////////////////////////////////////////////////////
        // Consistency
        ////////////////////////////////////////////////////////////////////////////////

        validate::check_inputs(validate::Inputs {
            reference: &inputs.reference,
            alignments: &[inputs.control.as_path(), inputs.tumor.as_path()],
            annotations: &[inputs.centromeres.as_path(), inputs.targets.as_path()],
        })
        .map_err(Error::Consistency)?;

        let centromeres =
            Rc::new(Centromeres::from_path(&inputs.centromeres).map_err(Error::Centromeres)?);
        info!("read centromeres for {} chromosomes", centromeres.len());

        ////////////////////////////////////////////////////////////////////////////////
        // Alignment statistics and the data ratio
        ////////////////////////////////////////////////////////////////////////////////

        self.runner.run(&Stage::external(
            "control-flagstat",
            tools.flagstat(&inputs.control),
            [inputs.control.clone()],
            &artifacts.control_flagstat,
        ))?;

        self.runner.run(&Stage::external(
            "tumor-flagstat",
            tools.flagstat(&inputs.tumor),
            [inputs.tumor.clone()],
            &artifacts.tumor_flagstat,
        ))?;

        let ratio = self.data_ratio(&artifacts)?;

        ////////////////////////////////////////////////////////////////////////////////
        // Pileup
        ////////////////////////////////////////////////////////////////////////////////

        self.runner.run(&Stage::external(
            "pileup",
            tools.mpileup(
                &inputs.reference,
                &inputs.targets,
                &inputs.control,
                &inputs.tumor,
            ),
            [
                inputs.reference.clone(),
                inputs.targets.clone(),
                inputs.control.clone(),
                inputs.tumor.clone(),
            ],
            &artifacts.pileup,
        ))?;

        if artifact::is_valid(&artifacts.pileup) {
            validate::check_pileup_reference_bases(&artifacts.pileup)
                .map_err(Error::Consistency)?;
        }

        ////////////////////////////////////////////////////////////////////////////////
        // Copy number
        ////////////////////////////////////////////////////////////////////////////////

        self.runner.run(&Stage::external(
            "copynumber",
            tools.copynumber(&artifacts.pileup, &artifacts.copynumber_prefix, &ratio),
            [artifacts.pileup.clone()],
            &artifacts.copynumber,
        ))?;

        let filter_centromeres = Rc::clone(&centromeres);
        self.runner.run(&Stage::internal(
            "filter",
            "filter copy-number records",
            move |inputs, output| filter_copynumber(&inputs[0], output, &filter_centromeres),
            [artifacts.copynumber.clone()],
            &artifacts.filtered,
        ))?;

        self.runner.run(&Stage::external(
            "call",
            tools.copy_caller(
                &artifacts.filtered,
                &artifacts.called,
                &artifacts.called_homdel,
                None,
            ),
            [artifacts.filtered.clone()],
            &artifacts.called,
        ))?;

        ////////////////////////////////////////////////////////////////////////////////
        // Recentering
        ////////////////////////////////////////////////////////////////////////////////

        let decision = self.decide(&artifacts)?;
        let recenter = match decision.caller_option() {
            Some(option) => Stage::external(
                "recenter",
                tools.copy_caller(
                    &artifacts.filtered,
                    &artifacts.recentered,
                    &artifacts.recentered_homdel,
                    Some(option),
                ),
                [artifacts.filtered.clone()],
                &artifacts.recentered,
            ),
            None => Stage::internal(
                "recenter",
                "alias the called segments",
                |inputs, output| artifact::alias(&inputs[0], output).map_err(Into::into),
                [artifacts.called.clone()],
                &artifacts.recentered,
            ),
        };
        self.runner.run(&recenter)?;

        ////////////////////////////////////////////////////////////////////////////////
        // Segmentation
        ////////////////////////////////////////////////////////////////////////////////

        let split_centromeres = Rc::clone(&centromeres);
        self.runner.run(&Stage::internal(
            "split-arms",
            "split calls into chromosome arms",
            move |inputs, output| {
                arm::split_file(&inputs[0], output, &Layout::CALLED, &split_centromeres)
                    .map(|_| ())
                    .map_err(Into::into)
            },
            [artifacts.recentered.clone()],
            &artifacts.arms,
        ))?;

        self.runner.run(&Stage::internal(
            "segmentation-script",
            "write the segmentation script",
            |_, output| std::fs::write(output, tools::DNACOPY_SCRIPT).map_err(Into::into),
            std::iter::empty(),
            &artifacts.script,
        ))?;

        self.runner.run(&Stage::external(
            "segmentation",
            tools.segment(
                &artifacts.script,
                &artifacts.arms,
                &artifacts.segments,
                self.settings.undo_sd,
            ),
            [artifacts.script.clone(), artifacts.arms.clone()],
            &artifacts.segments,
        ))?;

        let merge_sample = sample.clone();
        self.runner.run(&Stage::internal(
            "merge-arms",
            "merge arms into the final report",
            move |inputs, output| {
                arm::merge_file(&inputs[0], output, &Layout::SEGMENTED, &merge_sample)
                    .map(|_| ())
                    .map_err(Into::into)
            },
            [artifacts.segments.clone()],
            &artifacts.report,
        ))?;

        info!(
            "finished: {} stages run, {} stages already complete",
            self.runner.invocations(),
            self.runner.skipped()
        );

        match self.runner.dry_run() {
            true => Ok(None),
            false => Ok(Some(artifacts.report)),
        }
    }

    /// Computes the control/tumor data ratio from the alignment statistics.
    fn data_ratio(&self, artifacts: &Artifacts) -> Result<String> {
        let available = artifact::is_valid(&artifacts.control_flagstat)
            && artifact::is_valid(&artifacts.tumor_flagstat);

        if self.runner.dry_run() && !available {
            return Ok(DRY_RUN_RATIO.to_string());
        }

        let control =
            AlignmentMetrics::from_path(&artifacts.control_flagstat).map_err(Error::Metrics)?;
        let tumor =
            AlignmentMetrics::from_path(&artifacts.tumor_flagstat).map_err(Error::Metrics)?;
        let ratio = metrics::ratio(control, tumor).map_err(Error::Metrics)?;

        info!(
            "data ratio: {ratio} ({} control / {} tumor mapped reads)",
            control.mapped(),
            tumor.mapped()
        );

        Ok(ratio.to_string())
    }

    /// Decides how to recenter the called segments.
    ///
    /// Once the recentered artifact is complete, the decision has already been
    /// acted upon and is not recomputed.
    fn decide(&self, artifacts: &Artifacts) -> Result<Decision> {
        if artifact::is_valid(&artifacts.recentered) {
            return Ok(Decision::NoShift);
        }

        if self.runner.dry_run() && !artifact::is_valid(&artifacts.called) {
            info!("recenter: the decision depends on the called segments");
            return Ok(Decision::NoShift);
        }

        let expected = recenter::chromosomes(&artifacts.filtered, &Layout::COPYNUMBER)
            .map_err(Error::Decision)?;
        let delta = recenter::compute_delta(&artifacts.called, &expected)
            .map_err(Error::Decision)?;
        let decision = Decision::from_delta(delta);

        info!("recenter: delta is {delta:.4}; {decision}");
        Ok(decision)
    }
}

/// Keeps the header and every copy-number record whose chromosome has an
/// annotated centromere and whose log ratio is a finite number.
fn filter_copynumber(
    input: &Path,
    output: &Path,
    centromeres: &Centromeres,
) -> std::result::Result<(), TransformError> {
    let reader = BufReader::new(File::open(input)?);
    let writer = BufWriter::new(File::create(output)?);
    let (kept, dropped) = filter_records(reader, writer, centromeres)?;

    let chromosomes = dropped.iter().cloned().collect::<Vec<_>>();
    if !chromosomes.is_empty() {
        warn!(
            "filter: dropped records on chromosomes without a centromere: {}",
            chromosomes.join(", ")
        );
    }
    debug!("filter: kept {kept} copy-number records");

    Ok(())
}

/// Filters copy-number records, returning the number of records kept and the
/// chromosomes whose records were dropped for lacking a centromere.
///
/// A record that cannot be parsed is an error.
fn filter_records<R, W>(
    reader: R,
    mut writer: W,
    centromeres: &Centromeres,
) -> io::Result<(usize, BTreeSet<String>)>
where
    R: BufRead,
    W: Write,
{
    let layout = Layout::COPYNUMBER;
    let mut kept = 0;
    let mut dropped = BTreeSet::new();

    for (i, result) in reader.lines().enumerate() {
        let line = result?;

        if i == 0 && segment::is_header(&line, &layout) {
            writeln!(writer, "{line}")?;
            continue;
        } else if line.trim().is_empty() {
            continue;
        }

        let record = SegmentRecord::parse(&line, &layout).map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid copy-number record at line {}: {err}", i + 1),
            )
        })?;

        if !record.log_ratio().is_finite() {
            continue;
        }

        let name = record.chromosome().name();
        if !centromeres.contains(name) {
            dropped.insert(name.to_string());
            continue;
        }

        writeln!(writer, "{line}")?;
        kept += 1;
    }

    writer.flush()?;
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts() {
        let artifacts = Artifacts::new(Path::new("/work"), "tumor-17");

        assert_eq!(
            artifacts.control_flagstat,
            Path::new("/work/tumor-17.control.flagstat")
        );
        assert_eq!(artifacts.copynumber_prefix, Path::new("/work/tumor-17"));
        assert_eq!(artifacts.copynumber, Path::new("/work/tumor-17.copynumber"));
        assert_eq!(
            artifacts.recentered,
            Path::new("/work/tumor-17.copynumber.called.recentered")
        );
        assert_eq!(artifacts.script, Path::new("/work/dnacopy.R"));
        assert_eq!(
            artifacts.report,
            Path::new("/work/tumor-17.segments.report")
        );
    }

    #[test]
    fn test_filter_records() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let centromeres = Centromeres::read(&b"chr1\t100\t200\nchr2\t100\t200\n"[..])?;
        let input = "\
chrom\tchr_start\tchr_stop\tnum_positions\tnormal_depth\ttumor_depth\tlog2_ratio\tgc_content
chr1\t1\t50\t10\t20.0\t20.0\t0.0\t40.0
chrM\t1\t50\t10\t20.0\t20.0\t0.1\t40.0
chr2\t1\t50\t10\t20.0\t0.0\t-inf\t40.0
chr2\t300\t350\t10\t20.0\t20.0\tNaN\t40.0
chr2\t400\t450\t10\t20.0\t25.0\t0.32\t40.0
";

        let mut output = Vec::new();
        let (kept, dropped) = filter_records(input.as_bytes(), &mut output, &centromeres)?;

        assert_eq!(kept, 2);
        assert_eq!(dropped.into_iter().collect::<Vec<_>>(), vec!["chrM"]);
        assert_eq!(
            String::from_utf8(output)?,
            "\
chrom\tchr_start\tchr_stop\tnum_positions\tnormal_depth\ttumor_depth\tlog2_ratio\tgc_content
chr1\t1\t50\t10\t20.0\t20.0\t0.0\t40.0
chr2\t400\t450\t10\t20.0\t25.0\t0.32\t40.0
"
        );
        Ok(())
    }

    #[test]
    fn test_filter_records_truncated() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let centromeres = Centromeres::read(&b"chr1\t100\t200\n"[..])?;
        let input = "\
chrom\tchr_start\tchr_stop\tnum_positions\tnormal_depth\ttumor_depth\tlog2_ratio\tgc_content
chr1\t1\t50\t10\t20.0\t20.0\t0.0\t40.0
chr1\t300\t350\t10\t20.0\t20.0\t0.1\t40.0
chr1\t400\t4
";

        let mut output = Vec::new();
        let err = filter_records(input.as_bytes(), &mut output, &centromeres).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().starts_with("invalid copy-number record at line 4: "));
        Ok(())
    }

    #[test]
    fn test_invalid_sample() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = tempdir::TempDir::new("pipeline")?;
        let dir = RunDirectory::resume(root.path(), true)?;
        let inputs = Inputs {
            control: PathBuf::from("control.bam"),
            tumor: PathBuf::from("tumor.bam"),
            reference: PathBuf::from("genome.fa"),
            centromeres: PathBuf::from("centromeres.bed"),
            targets: PathBuf::from("targets.bed"),
        };

        for sample in ["", "a/b"] {
            let settings = Settings {
                sample: sample.to_string(),
                ..Default::default()
            };

            let err = Pipeline::new(inputs.clone(), settings)
                .run(&dir)
                .unwrap_err();
            assert!(matches!(err, Error::InvalidSample(_)));
        }

        Ok(())
    }

    #[test]
    fn test_missing_input() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let root = tempdir::TempDir::new("pipeline")?;
        let dir = RunDirectory::resume(root.path(), true)?;
        let inputs = Inputs {
            control: root.path().join("control.bam"),
            tumor: root.path().join("tumor.bam"),
            reference: root.path().join("genome.fa"),
            centromeres: root.path().join("centromeres.bed"),
            targets: root.path().join("targets.bed"),
        };

        let err = Pipeline::new(inputs, Settings::default())
            .run(&dir)
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput("control alignment", _)));
        Ok(())
    }
}
