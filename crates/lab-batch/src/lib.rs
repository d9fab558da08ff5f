//! Batch trials: materialize each flag combination of a batch as its own
//! run copied from the batch prototype, then restart it.

pub mod batch;
pub mod error;
pub mod executor;
pub mod flags;
pub mod report;
pub mod trial;

pub use batch::Batch;
pub use error::{BatchError, Result};
pub use executor::{ExecOutcome, ExecRequest, Executor, ProcessExecutor};
pub use flags::{flag_assigns, flags_label, format_flag_val, shell_quote, Flags};
pub use report::{print_trials, trials_table, write_trials, TrialRow, TrialsTable};
pub use trial::Trial;

use lab_core::LabConfig;

/// Opens the batch for the current run described by `config`.
pub fn init_batch(config: &LabConfig) -> Result<Batch> {
    Batch::from_config(config)
}
