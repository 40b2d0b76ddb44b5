//! Idempotent execution of [`Stage`]s.
//!
//! A stage whose output is already a valid artifact is never run again. This
//! is what makes a run resumable: rerunning against the same run directory
//! picks up at the first stage without a valid output.

use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::artifact;
use crate::chromosome;
use crate::stage::Invocation;
use crate::stage::Program;
use crate::stage::Stage;
use crate::stage::TransformError;

/// The number of trailing lines of a failed tool's standard error that are
/// reported.
const STDERR_TAIL_LINES: usize = 10;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to running a [`Stage`].
#[derive(Debug)]
pub enum Error {
    /// A required input is missing or is not a valid artifact.
    MissingInput {
        /// The stage.
        stage: &'static str,

        /// The input.
        input: PathBuf,
    },

    /// The stage ran but its output is not a valid artifact.
    InvalidOutput {
        /// The stage.
        stage: &'static str,

        /// The output.
        output: PathBuf,
    },

    /// The program could not be started.
    Spawn {
        /// The stage.
        stage: &'static str,

        /// The program.
        program: String,

        /// The underlying error.
        err: io::Error,
    },

    /// The program exited unsuccessfully.
    ToolFailed {
        /// The stage.
        stage: &'static str,

        /// The exit status.
        status: ExitStatus,

        /// The last lines the program wrote to standard error.
        stderr: String,
    },

    /// An in-process transformation failed.
    Transform {
        /// The stage.
        stage: &'static str,

        /// The underlying error.
        err: TransformError,
    },

    /// An I/O error.
    Io {
        /// The stage.
        stage: &'static str,

        /// The path being accessed.
        path: PathBuf,

        /// The underlying error.
        err: io::Error,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingInput { stage, input } => write!(
                f,
                "stage `{stage}`: required input `{}` is missing or incomplete",
                input.display()
            ),
            Error::InvalidOutput { stage, output } => write!(
                f,
                "stage `{stage}`: output `{}` is missing or incomplete after running",
                output.display()
            ),
            Error::Spawn {
                stage,
                program,
                err,
            } => write!(f, "stage `{stage}`: could not start `{program}`: {err}"),
            Error::ToolFailed {
                stage,
                status,
                stderr,
            } => {
                write!(f, "stage `{stage}`: the program exited with {status}")?;

                if !stderr.is_empty() {
                    write!(f, "\n\nstderr:\n{stderr}")?;
                }

                Ok(())
            }
            Error::Transform { stage, err } => write!(f, "stage `{stage}`: {err}"),
            Error::Io { stage, path, err } => {
                write!(f, "stage `{stage}`: i/o error with `{}`: {err}", path.display())
            }
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Runner
////////////////////////////////////////////////////////////////////////////////////////

/// What happened when a stage was run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The output was already valid, so nothing was invoked.
    Skipped,

    /// The stage was invoked and produced a valid output.
    Completed,

    /// The stage was only logged (dry-run mode).
    DryRun,
}

/// Runs stages, skipping any whose output is already valid.
#[derive(Debug, Default)]
pub struct Runner {
    /// Whether stages are only logged rather than invoked.
    dry_run: bool,

    /// The number of stages that were actually invoked.
    invocations: usize,

    /// The number of stages that were skipped.
    skipped: usize,
}

impl Runner {
    /// Creates a new runner.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    /// Returns whether stages are only logged.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Gets the number of stages that were actually invoked.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    /// Gets the number of stages that were skipped because their output was
    /// already valid.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Runs a stage.
    pub fn run(&mut self, stage: &Stage) -> Result<Outcome> {
        let name = stage.name();
        let output = stage.output();

        if artifact::is_valid(output) {
            info!(
                "{name}: `{}` already exists; skipping",
                file_name(output).display()
            );
            self.skipped += 1;
            return Ok(Outcome::Skipped);
        }

        for input in stage.inputs() {
            if chromosome::is_alignment(input) || artifact::is_valid(input) {
                continue;
            }

            if self.dry_run {
                warn!(
                    "{name}: required input `{}` is missing or incomplete",
                    input.display()
                );
            } else {
                return Err(Error::MissingInput {
                    stage: name,
                    input: input.clone(),
                });
            }
        }

        if self.dry_run {
            info!("{name}: would run {}", stage.invocation());
            return Ok(Outcome::DryRun);
        }

        info!("{name}: running {}", stage.invocation());
        self.invocations += 1;

        match stage.invocation() {
            Invocation::External(program) => run_program(name, program, output)?,
            Invocation::Internal(_, transform) => {
                if let Err(err) = transform(stage.inputs(), output) {
                    quarantine(name, output)?;
                    return Err(Error::Transform { stage: name, err });
                }
            }
        }

        if !artifact::is_valid(output) {
            return Err(Error::InvalidOutput {
                stage: name,
                output: output.to_path_buf(),
            });
        }

        Ok(Outcome::Completed)
    }
}

/// Runs an external program to completion.
fn run_program(stage: &'static str, program: &Program, output: &Path) -> Result<()> {
    let mut command = Command::new(program.program());
    command.args(program.arguments()).stdin(Stdio::null());

    if program.captures_stdout() {
        let file = File::create(output).map_err(|err| Error::Io {
            stage,
            path: output.to_path_buf(),
            err,
        })?;
        command.stdout(Stdio::from(file));
    }

    let result = command.output().map_err(|err| Error::Spawn {
        stage,
        program: program.program().to_string_lossy().into_owned(),
        err,
    })?;

    for line in String::from_utf8_lossy(&result.stdout).lines() {
        debug!("{stage}: {line}");
    }

    let stderr = String::from_utf8_lossy(&result.stderr);
    for line in stderr.lines() {
        debug!("{stage}: {line}");
    }

    if !result.status.success() {
        quarantine(stage, output)?;

        let lines = stderr.lines().collect::<Vec<_>>();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");

        return Err(Error::ToolFailed {
            stage,
            status: result.status,
            stderr: tail,
        });
    }

    Ok(())
}

/// Moves an output left behind by a failed stage out of the way.
fn quarantine(stage: &'static str, output: &Path) -> Result<()> {
    match artifact::quarantine(output) {
        Ok(Some(moved)) => {
            warn!("{stage}: partial output moved to `{}`", moved.display());
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => Err(Error::Io {
            stage,
            path: output.to_path_buf(),
            err,
        }),
    }
}

/// Gets the file name of a path for logging, falling back to the full path.
fn file_name(path: &Path) -> &Path {
    path.file_name().map(Path::new).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use tempdir::TempDir;

    use super::*;

    /// Builds a stage that writes `contents` and counts its invocations.
    fn counting_stage(
        output: PathBuf,
        inputs: Vec<PathBuf>,
        contents: &'static str,
        counter: Rc<Cell<usize>>,
    ) -> Stage {
        Stage::internal(
            "write",
            "write a fixed table",
            move |_, output| {
                counter.set(counter.get() + 1);
                std::fs::write(output, contents)?;
                Ok(())
            },
            inputs,
            output,
        )
    }

    #[test]
    fn test_runs_then_skips() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let counter = Rc::new(Cell::new(0));
        let stage = counting_stage(
            dir.path().join("out"),
            vec![],
            "header\nrecord\n",
            counter.clone(),
        );

        let mut runner = Runner::new(false);
        assert_eq!(runner.run(&stage)?, Outcome::Completed);
        assert_eq!(runner.run(&stage)?, Outcome::Skipped);
        assert_eq!(counter.get(), 1);
        assert_eq!(runner.invocations(), 1);
        assert_eq!(runner.skipped(), 1);
        Ok(())
    }

    #[test]
    fn test_invalid_input() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let input = dir.path().join("in");
        std::fs::write(&input, "only one line\n")?;

        let counter = Rc::new(Cell::new(0));
        let stage = counting_stage(
            dir.path().join("out"),
            vec![input.clone()],
            "header\nrecord\n",
            counter.clone(),
        );

        let err = Runner::new(false).run(&stage).unwrap_err();
        assert!(matches!(&err, Error::MissingInput { input: i, .. } if i == &input));
        assert_eq!(counter.get(), 0);
        Ok(())
    }

    #[test]
    fn test_alignment_inputs_are_not_checked() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = TempDir::new("runner")?;
        let counter = Rc::new(Cell::new(0));
        let stage = counting_stage(
            dir.path().join("out"),
            vec![dir.path().join("control.bam")],
            "header\nrecord\n",
            counter.clone(),
        );

        Runner::new(false).run(&stage)?;
        assert_eq!(counter.get(), 1);
        Ok(())
    }

    #[test]
    fn test_invalid_output() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let counter = Rc::new(Cell::new(0));
        let stage = counting_stage(
            dir.path().join("out"),
            vec![],
            "error: no data\n",
            counter.clone(),
        );

        let err = Runner::new(false).run(&stage).unwrap_err();
        assert!(matches!(err, Error::InvalidOutput { stage: "write", .. }));
        Ok(())
    }

    #[test]
    fn test_dry_run() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let counter = Rc::new(Cell::new(0));
        let stage = counting_stage(
            dir.path().join("out"),
            vec![dir.path().join("missing")],
            "header\nrecord\n",
            counter.clone(),
        );

        let mut runner = Runner::new(true);
        assert_eq!(runner.run(&stage)?, Outcome::DryRun);
        assert_eq!(counter.get(), 0);
        assert_eq!(runner.invocations(), 0);
        assert!(!dir.path().join("out").exists());
        Ok(())
    }

    #[test]
    fn test_failed_transform_is_quarantined() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let dir = TempDir::new("runner")?;
        let output = dir.path().join("out");
        let stage = Stage::internal(
            "partial",
            "write a partial table",
            |_, output| {
                std::fs::write(output, "header\nrec")?;
                Err("ran out of records".into())
            },
            vec![],
            output.clone(),
        );

        let err = Runner::new(false).run(&stage).unwrap_err();
        assert_eq!(err.to_string(), "stage `partial`: ran out of records");
        assert!(!output.exists());
        assert!(artifact::failed_path(&output).exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_external_program_stdout() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let output = dir.path().join("out");
        let program = Program::new("sh")
            .arg("-c")
            .arg("printf 'a\\nb\\n'")
            .capture_stdout();
        let stage = Stage::external("printf", program, [], output.clone());

        Runner::new(false).run(&stage)?;
        assert_eq!(std::fs::read_to_string(&output)?, "a\nb\n");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_external_program_failure() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let output = dir.path().join("out");
        let program = Program::new("sh")
            .arg("-c")
            .arg("printf 'a\\nb\\n'; echo 'something broke' >&2; exit 3")
            .capture_stdout();
        let stage = Stage::external("broken", program, [], output.clone());

        let err = Runner::new(false).run(&stage).unwrap_err();
        assert!(matches!(&err, Error::ToolFailed { stderr, .. } if stderr == "something broke"));
        assert!(!output.exists());
        assert!(artifact::failed_path(&output).exists());
        Ok(())
    }

    #[test]
    fn test_missing_program() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new("runner")?;
        let program = Program::new("copyseg-definitely-not-a-real-program");
        let stage = Stage::external("missing", program, [], dir.path().join("out"));

        let err = Runner::new(false).run(&stage).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
        Ok(())
    }
}
