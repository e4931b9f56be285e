//! Runtime configuration for a scenario environment.

use std::path::PathBuf;
use std::time::Duration;

/// How many interpreter instructions run between cancellation checks.
pub const DEFAULT_HOOK_INTERVAL: u32 = 10_000;

/// Configuration for one [`crate::runtime::Environment`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for run artifacts; defaults to the script's directory.
    pub artifact_dir: Option<PathBuf>,
    /// Budget for the whole run; once spent, the ambient context cancels
    /// with a `"timeout"` classification.
    pub run_timeout: Duration,
    /// Deadline for a single blocking driver operation.
    pub op_deadline: Duration,
    /// Instruction interval of the cancellation hook.
    pub hook_interval: u32,
    /// Emit verbose diagnostics and keep debug artifacts.
    pub debug: bool,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Config {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Config {
        self.run_timeout = timeout;
        self
    }

    pub fn with_op_deadline(mut self, deadline: Duration) -> Config {
        self.op_deadline = deadline;
        self
    }

    pub fn with_hook_interval(mut self, instructions: u32) -> Config {
        self.hook_interval = instructions;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Config {
        self.debug = debug;
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            artifact_dir: None,
            run_timeout: Duration::from_secs(60 * 60),
            op_deadline: Duration::from_secs(30),
            hook_interval: DEFAULT_HOOK_INTERVAL,
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chains() {
        let config = Config::new()
            .with_artifact_dir("/tmp/artifacts")
            .with_op_deadline(Duration::from_secs(5))
            .with_debug(true);
        assert_eq!(config.artifact_dir.as_deref().unwrap().to_str(), Some("/tmp/artifacts"));
        assert_eq!(config.op_deadline, Duration::from_secs(5));
        assert!(config.debug);
        assert_eq!(config.hook_interval, DEFAULT_HOOK_INTERVAL);
    }
}
