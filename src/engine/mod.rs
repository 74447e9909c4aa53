//! Engine: run coordination, bulk work submission, index-scale sequencing and the CLI front end.

pub mod arg_parser;
pub mod assessor;
pub mod cancel;
pub mod cli;
pub mod core;
pub mod progress;
pub mod sequencer;
pub mod work;

pub use arg_parser::Cli;
pub use assessor::{ItemOutcome, ResultAssessor};
pub use cancel::CancelToken;
pub use cli::handle_run;
pub use core::{CoordinatorState, MassIndexer, MassIndexingHandle};
pub use progress::{
    LoggingMonitor, MassIndexingMonitor, NoopMonitor, ProgressBarMonitor, ProgressTracker,
};
pub use sequencer::{GroupSequencer, IndexScalePlan, IndexScaleSequencer, SequencerState};
pub use work::{OrchestratorContext, WorkOrchestrator};
