//! Stages of a pipeline run.
//!
//! A [`Stage`] names what to invoke, the artifacts it reads, and the single
//! artifact it writes. Stages carry no hidden state: everything the
//! [`Runner`] needs to decide whether (and how) to execute a stage is on the
//! stage itself.

use std::ffi::OsStr;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

use nonempty::NonEmpty;

pub mod runner;

pub use runner::Runner;

/// An error returned by an in-process transformation.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// An in-process transformation from a stage's inputs to its output.
pub type Transform = Box<dyn Fn(&[PathBuf], &Path) -> Result<(), TransformError>>;

/// An external program invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Program {
    /// The program followed by its arguments.
    argv: NonEmpty<OsString>,

    /// Whether standard output is written to the stage's output.
    capture_stdout: bool,
}

impl Program {
    /// Creates a new invocation of `program` with no arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use copyseg::stage::Program;
    ///
    /// let program = Program::new("samtools")
    ///     .arg("flagstat")
    ///     .arg("tumor.bam")
    ///     .capture_stdout();
    ///
    /// assert_eq!(program.to_string(), "samtools flagstat tumor.bam > <output>");
    /// ```
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            argv: NonEmpty::new(program.as_ref().to_os_string()),
            capture_stdout: false,
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.argv.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.argv.push(arg.as_ref().to_os_string());
        }

        self
    }

    /// Writes the program's standard output to the stage's output.
    pub fn capture_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Gets the program.
    pub fn program(&self) -> &OsStr {
        &self.argv.head
    }

    /// Gets the arguments.
    pub fn arguments(&self) -> &[OsString] {
        &self.argv.tail
    }

    /// Returns whether standard output is written to the stage's output.
    pub fn captures_stdout(&self) -> bool {
        self.capture_stdout
    }
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let words = self
            .argv
            .iter()
            .map(|arg| {
                let arg = arg.to_string_lossy();
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("'{arg}'")
                } else {
                    arg.into_owned()
                }
            })
            .collect::<Vec<_>>();

        write!(f, "{}", words.join(" "))?;

        if self.capture_stdout {
            write!(f, " > <output>")?;
        }

        Ok(())
    }
}

/// What a stage invokes.
pub enum Invocation {
    /// An external program.
    External(Program),

    /// An in-process transformation, with a short description for logging.
    Internal(&'static str, Transform),
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::External(program) => f.debug_tuple("External").field(program).finish(),
            Invocation::Internal(description, _) => {
                f.debug_tuple("Internal").field(description).finish()
            }
        }
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::External(program) => write!(f, "{program}"),
            Invocation::Internal(description, _) => write!(f, "<{description}>"),
        }
    }
}

/// A single step of a run.
#[derive(Debug)]
pub struct Stage {
    /// The name of the stage.
    name: &'static str,

    /// What the stage invokes.
    invocation: Invocation,

    /// The artifacts the stage reads.
    inputs: Vec<PathBuf>,

    /// The artifact the stage writes.
    output: PathBuf,
}

impl Stage {
    /// Creates a stage that runs an external program.
    pub fn external(
        name: &'static str,
        program: Program,
        inputs: impl IntoIterator<Item = PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name,
            invocation: Invocation::External(program),
            inputs: inputs.into_iter().collect(),
            output: output.into(),
        }
    }

    /// Creates a stage that runs an in-process transformation.
    pub fn internal<F>(
        name: &'static str,
        description: &'static str,
        transform: F,
        inputs: impl IntoIterator<Item = PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self
    where
        F: Fn(&[PathBuf], &Path) -> Result<(), TransformError> + 'static,
    {
        Self {
            name,
            invocation: Invocation::Internal(description, Box::new(transform)),
            inputs: inputs.into_iter().collect(),
            output: output.into(),
        }
    }

    /// Gets the name of the stage.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets what the stage invokes.
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Gets the artifacts the stage reads.
    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    /// Gets the artifact the stage writes.
    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_accessors() {
        let program = Program::new("java")
            .args(["-jar", "VarScan.jar"])
            .arg("copynumber");

        assert_eq!(program.program(), "java");
        assert_eq!(
            program.arguments(),
            &[
                OsString::from("-jar"),
                OsString::from("VarScan.jar"),
                OsString::from("copynumber")
            ]
        );
        assert!(!program.captures_stdout());
    }

    #[test]
    fn test_program_display_quotes_whitespace() {
        let program = Program::new("Rscript").arg("my script.R").arg("");
        assert_eq!(program.to_string(), "Rscript 'my script.R' ''");
    }

    #[test]
    fn test_stage_accessors() {
        let stage = Stage::internal(
            "filter",
            "filter copy-number records",
            |_, _| Ok(()),
            [PathBuf::from("a")],
            "b",
        );

        assert_eq!(stage.name(), "filter");
        assert_eq!(stage.inputs(), &[PathBuf::from("a")]);
        assert_eq!(stage.output(), Path::new("b"));
        assert_eq!(stage.invocation().to_string(), "<filter copy-number records>");
    }
}
