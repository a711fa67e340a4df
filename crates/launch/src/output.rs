//! Per-job stream redirection.
//!
//! Redirection runs after the chdir, so relative output files land in the
//! sub-job's own working directory. Before any stream is replaced, the
//! original stderr descriptor is duplicated and kept for the crash path —
//! a failing rank must be able to report even when stderr points at
//! `/dev/null`.

use log::warn;
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::str::FromStr;

/// What happens to a rank's stdout and stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Leave both streams untouched.
    System,
    /// Every rank writes to the null device.
    None,
    /// Rank 0 of each sub-job writes `cram.<job_id>.out|err`; other ranks
    /// write to the null device. The default.
    Rank0,
    /// Every rank writes `cram.<job_id>.<local_rank>.out|err`.
    All,
}

impl FromStr for OutputMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("system") {
            Ok(Self::System)
        } else if s.eq_ignore_ascii_case("none") {
            Ok(Self::None)
        } else if s.eq_ignore_ascii_case("rank0") {
            Ok(Self::Rank0)
        } else if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            Err(())
        }
    }
}

/// Resolved redirection target for one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// Keep the launcher's streams.
    Inherit,
    /// Both streams to the null device.
    Null,
    /// Both streams to per-job files (relative to the working directory).
    Files { out: PathBuf, err: PathBuf },
}

impl OutputMode {
    /// Where a rank's streams go under this mode.
    pub fn target(self, job_id: u32, local_rank: u32) -> StreamTarget {
        match self {
            Self::System => StreamTarget::Inherit,
            Self::None => StreamTarget::Null,
            Self::Rank0 => {
                if local_rank == 0 {
                    StreamTarget::Files {
                        out: PathBuf::from(format!("cram.{}.out", job_id)),
                        err: PathBuf::from(format!("cram.{}.err", job_id)),
                    }
                } else {
                    StreamTarget::Null
                }
            }
            Self::All => StreamTarget::Files {
                out: PathBuf::from(format!("cram.{}.{}.out", job_id, local_rank)),
                err: PathBuf::from(format!("cram.{}.{}.err", job_id, local_rank)),
            },
        }
    }
}

/// Applies the redirection policy to this process's stdout and stderr.
///
/// Returns the duplicated original stderr descriptor when any stream was
/// replaced, so crash reporting can bypass the redirection. Failures here
/// are best-effort: the streams are left as they are and a warning is
/// logged.
pub fn redirect(mode: OutputMode, job_id: u32, local_rank: u32) -> Option<RawFd> {
    let target = mode.target(job_id, local_rank);
    if target == StreamTarget::Inherit {
        return None;
    }

    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    if saved < 0 {
        warn!(
            "cannot preserve stderr: {}; leaving streams untouched",
            std::io::Error::last_os_error()
        );
        return None;
    }

    let result = match &target {
        StreamTarget::Null => File::create("/dev/null")
            .and_then(|null| replace_stream(&null, libc::STDOUT_FILENO).map(|_| null))
            .and_then(|null| replace_stream(&null, libc::STDERR_FILENO)),
        StreamTarget::Files { out, err } => File::create(out)
            .and_then(|f| replace_stream(&f, libc::STDOUT_FILENO))
            .and_then(|_| File::create(err))
            .and_then(|f| replace_stream(&f, libc::STDERR_FILENO)),
        StreamTarget::Inherit => Ok(()),
    };

    if let Err(e) = result {
        warn!("cannot redirect output ({:?}): {}", target, e);
    }
    Some(saved)
}

/// Points `stream_fd` at `file` via dup2. The original descriptor for
/// `file` closes when the `File` drops; the duplicate stays open.
fn replace_stream(file: &File, stream_fd: RawFd) -> std::io::Result<()> {
    if unsafe { libc::dup2(file.as_raw_fd(), stream_fd) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("SYSTEM".parse(), Ok(OutputMode::System));
        assert_eq!("none".parse(), Ok(OutputMode::None));
        assert_eq!("Rank0".parse(), Ok(OutputMode::Rank0));
        assert_eq!("aLL".parse(), Ok(OutputMode::All));
        assert_eq!("everything".parse::<OutputMode>(), Err(()));
    }

    #[test]
    fn rank0_mode_names_job_files() {
        assert_eq!(
            OutputMode::Rank0.target(3, 0),
            StreamTarget::Files {
                out: PathBuf::from("cram.3.out"),
                err: PathBuf::from("cram.3.err"),
            }
        );
        assert_eq!(OutputMode::Rank0.target(3, 1), StreamTarget::Null);
    }

    #[test]
    fn all_mode_names_rank_files() {
        assert_eq!(
            OutputMode::All.target(2, 5),
            StreamTarget::Files {
                out: PathBuf::from("cram.2.5.out"),
                err: PathBuf::from("cram.2.5.err"),
            }
        );
    }

    #[test]
    fn system_inherits_and_none_nulls() {
        assert_eq!(OutputMode::System.target(0, 0), StreamTarget::Inherit);
        assert_eq!(OutputMode::None.target(0, 0), StreamTarget::Null);
    }
}
