//! # Launch — run packed jobs inside one allocation
//!
//! At launch time a single oversubscribed allocation reads a cramfile,
//! partitions its process pool into one sub-pool per packed job, rewrites
//! each process's runtime environment (working directory, arguments,
//! environment variables), and hands the application a private world
//! communicator. Unmodified parallel applications then behave as if they
//! had been launched standalone.
//!
//! The entry point is [`Cram::init`]; everything underneath is usable on
//! its own — [`partition`] is the collective protocol, [`install_job`] the
//! per-process setup, [`OutputMode`] the stream-redirection policy.

pub mod args;
mod config;
pub mod crash;
mod output;
mod partition;
mod setup;
mod shim;

pub use config::{Config, CRAM_BUFFER_SIZE_VAR, CRAM_FILE_VAR, CRAM_OUTPUT_VAR};
pub use output::{OutputMode, StreamTarget};
pub use partition::{partition, Assignment};
pub use setup::{install_job, EXE_SENTINEL};
pub use shim::{Cram, Launch};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Format(#[from] cramfile::CramError),
    #[error(transparent)]
    Comm(#[from] comm::CommError),
    #[error("this cram file requires {required} processes, but the allocation has only {available}")]
    Capacity { required: u32, available: u32 },
    #[error("cram file contains no jobs")]
    EmptyContainer,
    #[error("cram file is inconsistent: record process counts do not sum to the header total")]
    InconsistentTotals,
}

/// Serializes tests that touch process-global state (environment
/// variables, the working directory, the argument mirror).
#[cfg(test)]
pub(crate) mod testlock {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static LOCK: Mutex<()> = Mutex::new(());

    pub fn hold() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
