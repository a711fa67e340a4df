//! Launch-time knobs, read from the environment once at init.

use log::warn;
use std::env;
use std::path::PathBuf;

use crate::output::OutputMode;
use cramfile::DEFAULT_BUFFER_SIZE;

/// Path of the cramfile to launch. Unset disables partitioning entirely.
pub const CRAM_FILE_VAR: &str = "CRAM_FILE";

/// Output redirection policy: `SYSTEM`, `NONE`, `RANK0`, or `ALL`.
pub const CRAM_OUTPUT_VAR: &str = "CRAM_OUTPUT";

/// Container read buffer size in bytes.
pub const CRAM_BUFFER_SIZE_VAR: &str = "CRAM_BUFFER_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Cramfile path, or `None` when cram is disabled.
    pub file: Option<PathBuf>,
    pub output: OutputMode,
    pub buffer_size: usize,
}

impl Config {
    /// Reads all knobs. Invalid values fall back to their defaults;
    /// `verbose` gates the accompanying warnings so only rank 0 emits them.
    pub fn from_env(verbose: bool) -> Self {
        let file = env::var_os(CRAM_FILE_VAR).map(PathBuf::from);

        let output = match env::var(CRAM_OUTPUT_VAR) {
            Ok(value) => value.parse().unwrap_or_else(|_| {
                if verbose {
                    warn!(
                        "unknown {} value {:?}, falling back to RANK0",
                        CRAM_OUTPUT_VAR, value
                    );
                }
                OutputMode::Rank0
            }),
            Err(_) => OutputMode::Rank0,
        };

        let buffer_size = match env::var(CRAM_BUFFER_SIZE_VAR) {
            Ok(value) => match value.parse::<usize>() {
                Ok(bytes) if bytes > 0 => bytes,
                _ => {
                    if verbose {
                        warn!(
                            "invalid {} value {:?}, falling back to {} bytes",
                            CRAM_BUFFER_SIZE_VAR, value, DEFAULT_BUFFER_SIZE
                        );
                    }
                    DEFAULT_BUFFER_SIZE
                }
            },
            Err(_) => DEFAULT_BUFFER_SIZE,
        };

        Self {
            file,
            output,
            buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlock;

    fn clear_knobs() {
        env::remove_var(CRAM_FILE_VAR);
        env::remove_var(CRAM_OUTPUT_VAR);
        env::remove_var(CRAM_BUFFER_SIZE_VAR);
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let _guard = testlock::hold();
        clear_knobs();

        let config = Config::from_env(true);
        assert_eq!(config.file, None);
        assert_eq!(config.output, OutputMode::Rank0);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn reads_all_knobs() {
        let _guard = testlock::hold();
        clear_knobs();
        env::set_var(CRAM_FILE_VAR, "/tmp/jobs.cram");
        env::set_var(CRAM_OUTPUT_VAR, "all");
        env::set_var(CRAM_BUFFER_SIZE_VAR, "65536");

        let config = Config::from_env(false);
        assert_eq!(config.file, Some(PathBuf::from("/tmp/jobs.cram")));
        assert_eq!(config.output, OutputMode::All);
        assert_eq!(config.buffer_size, 65536);
        clear_knobs();
    }

    #[test]
    fn invalid_values_fall_back() {
        let _guard = testlock::hold();
        clear_knobs();
        env::set_var(CRAM_OUTPUT_VAR, "sideways");
        env::set_var(CRAM_BUFFER_SIZE_VAR, "zero please");

        let config = Config::from_env(false);
        assert_eq!(config.output, OutputMode::Rank0);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);

        env::set_var(CRAM_BUFFER_SIZE_VAR, "0");
        let config = Config::from_env(false);
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        clear_knobs();
    }
}
