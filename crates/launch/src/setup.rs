//! Installs a decompressed job into the current process.

use log::warn;
use std::env;
use std::ffi::OsStr;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

use crate::args;
use cramfile::Job;

/// Placeholder in a packed `args[0]` meaning "keep the real executable
/// path": the packer cannot always know where the binary will live on the
/// compute nodes.
pub const EXE_SENTINEL: &[u8] = b"<exe>";

/// Rewrites this process to look like it was launched as `job`.
///
/// Order matters: the chdir comes first so everything later (including
/// output redirection) resolves relative paths in the job's directory.
/// Failures here are best-effort — the application may cope, or fail on
/// its own terms — so they warn and continue.
pub fn install_job(job: &Job) {
    let dir = PathBuf::from(std::ffi::OsString::from_vec(job.working_dir.clone()));
    if let Err(e) = env::set_current_dir(&dir) {
        warn!("cannot chdir to {}: {}", dir.display(), e);
    }

    let mut argv = job.args.clone();
    if argv.first().map(|a| a.as_slice()) == Some(EXE_SENTINEL) {
        if let Some(real_exe) = env::args_os().next() {
            argv[0] = real_exe.into_vec();
        }
    }

    for (key, value) in &job.env {
        set_env_var(key, value);
    }

    args::publish(argv);
}

/// Force-overwrites one environment variable, skipping pairs the host
/// cannot represent (empty keys, embedded `=` or nul).
fn set_env_var(key: &[u8], value: &[u8]) {
    if key.is_empty() || key.contains(&b'=') || key.contains(&0) || value.contains(&0) {
        warn!(
            "skipping unrepresentable environment variable {:?}",
            String::from_utf8_lossy(key)
        );
        return;
    }
    env::set_var(OsStr::from_bytes(key), OsStr::from_bytes(value));
}
