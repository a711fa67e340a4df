//! # Cramfile — packed job container
//!
//! A cramfile stores many small job invocations (process count, working
//! directory, argument vector, environment) so they can later be launched
//! together inside one large parallel allocation. The format is designed to
//! be scattered quickly to many processes: the first job is stored in full
//! and every later job stores only its differences from the first, so a
//! reader never has to decode more than two records to reconstruct any job.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ HEADER (always first 20 bytes)                       │
//! │                                                      │
//! │ magic (u32 = "cram") | version (u32) | num_jobs (u32)│
//! │ total_procs (u32) | max_job_size (u32)               │
//! ├──────────────────────────────────────────────────────┤
//! │ JOB RECORDS (repeated num_jobs times)                │
//! │                                                      │
//! │ record_len (u32) | num_procs (u32) | working_dir     │
//! │ num_args (u32) | args...                             │
//! │ num_subtracted (u32) | keys... (0 for first record)  │
//! │ num_changed (u32) | (key, value) pairs...            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian (network order) and unsigned. Strings are a
//! `u32` byte length followed by the raw bytes, with no nul terminator.
//! `max_job_size` is the size of the largest record, so readers can allocate
//! a single decode buffer up front.

mod format;
mod job;
mod reader;
mod writer;

pub use format::{read_header, write_header, Header, CRAM_MAGIC, CRAM_VERSION, HEADER_BYTES};
pub use job::{compress, decode_record, decompress, encode_record, Env, Job};
pub use reader::{CramReader, Jobs, DEFAULT_BUFFER_SIZE};
pub use writer::CramWriter;

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CramError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad magic {0:#010x}: not a cram file")]
    BadMagic(u32),
    #[error("cram file version {0} is not supported (expected {CRAM_VERSION})")]
    UnsupportedVersion(u32),
    #[error("truncated job record: expected {expected} bytes, {actual} available")]
    TruncatedRecord { expected: usize, actual: usize },
    #[error("invalid job record: {0}")]
    InvalidRecord(&'static str),
    #[error("cannot decompress a delta record without a base job")]
    NoBaseForDelta,
}
