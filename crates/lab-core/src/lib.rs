//! Run storage primitives shared by the lab crates: run handles and their
//! attribute store, operation references, the run store, id generation and
//! configuration.

pub mod config;
pub mod fs;
pub mod opref;
pub mod run;
pub mod store;

pub use config::LabConfig;
pub use fs::{atomic_write_bytes, atomic_write_json_pretty, copy_dir, ensure_dir};
pub use opref::OpRef;
pub use run::{Run, LAB_DIR};
pub use store::{FsRunStore, IdGenerator, LinkedRun, RunStore, UuidIds};
