//! `copyseg` is a crate for running a resumable tumor/normal copy-number
//! segmentation pipeline.
//!
//! Given a control (normal) and a tumor alignment, a reference genome, and
//! annotations of the centromeres and the sequenced targets, a run produces a
//! single report of copy-number segments for the sample. The heavy lifting is
//! done by external tools (`samtools`, VarScan, and the R package `DNAcopy`):
//! this crate decides what to run, in which order, with which arguments, and
//! performs the small transformations in between.
//!
//! ## Resuming runs
//!
//! Every stage of a run writes exactly one artifact to a run directory (see
//! [`RunDirectory`]). An artifact is considered complete when it is a regular
//! file with at least two lines (see [`artifact::is_valid()`]), and a stage
//! whose artifact is complete is never run again. When a run fails, the run
//! directory is left in place, so pointing a new run at the same directory
//! picks up at the first incomplete stage.
//!
//! ## Running a pipeline
//!
//! Most users will want the `copyseg` binary. The same pipeline is available
//! through [`Pipeline`]:
//!
//! ```no_run
//! use copyseg::pipeline::Inputs;
//! use copyseg::pipeline::Settings;
//! use copyseg::Pipeline;
//! use copyseg::RunDirectory;
//!
//! let inputs = Inputs {
//!     control: "normal.bam".into(),
//!     tumor: "tumor.bam".into(),
//!     reference: "GRCh38.fa".into(),
//!     centromeres: "centromeres.bed".into(),
//!     targets: "exome.bed".into(),
//! };
//!
//! let settings = Settings {
//!     sample: String::from("SJ001"),
//!     ..Default::default()
//! };
//!
//! let dir = RunDirectory::create_in("/scratch", false)?;
//! let mut pipeline = Pipeline::new(inputs, settings);
//!
//! if let Some(report) = pipeline.run(&dir)? {
//!     print!("{}", std::fs::read_to_string(report)?);
//! }
//!
//! dir.finish()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod artifact;
pub mod chromosome;
pub mod metrics;
pub mod pipeline;
pub mod recenter;
pub mod segment;
pub mod stage;
pub mod tools;
pub mod validate;
pub mod workdir;

pub use pipeline::Pipeline;
pub use stage::Stage;
pub use tools::Tools;
pub use workdir::RunDirectory;
