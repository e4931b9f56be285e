//! Lua-scripted web scenarios on a concurrent host process.
//!
//! The crate embeds a Lua interpreter next to an injected browser driver and
//! keeps the two honest about concurrency: one exclusive execution handle
//! over interpreter state, an async bridge for blocking host work, an event
//! dispatcher for driver-originated callbacks, and a background task tracker
//! gating shutdown. See [`runtime`] for the core and [`run_scenario`] for
//! the batteries-included entry point.

pub mod clock;
pub mod driver;
pub mod record;
pub mod repl;
pub mod runtime;
pub mod storage;
pub mod tab;

pub use driver::{Driver, DriverTab, TabEvent, Viewport};
pub use record::{Logger, Record, Status};
pub use runtime::{Config, Environment, Error, HostError, Value};
pub use storage::Storage;

use chrono::Utc;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Execute a scenario script against a driver and produce its terminal
/// record: status, latency, printed output, and error/trace/artifact extras.
pub fn run_scenario(driver: Arc<dyn Driver>, script: &Path, config: Config) -> Record {
    let timestamp = Utc::now();

    let storage = match Storage::new(config.artifact_dir.as_deref(), script, timestamp) {
        Ok(storage) => Arc::new(storage),
        Err(err) => return Record::failed(timestamp, err.to_string()),
    };
    let source = match std::fs::read_to_string(script) {
        Ok(source) => source,
        Err(err) => return Record::failed(timestamp, err.to_string()),
    };

    let logger = Arc::new(Logger::new(config.debug));
    let env = match Environment::new(Arc::clone(&storage), Arc::clone(&logger), config) {
        Ok(env) => env,
        Err(err) => return Record::failed(timestamp, err.to_string()),
    };
    if let Err(err) = tab::register(&env, driver).and_then(|()| clock::register(&env)) {
        env.close();
        return Record::failed(timestamp, err.to_string());
    }

    let started = Instant::now();
    let result = env.run(&source, &script.display().to_string());
    let latency = started.elapsed();

    if let Err(err) = result {
        logger.fail();
        match err {
            Error::Script { message, trace } => {
                logger.set_extra("error", json!(message));
                if let Some(trace) = trace {
                    logger.set_extra("trace", json!(trace));
                }
            }
            other => logger.set_extra("error", json!(other.to_string())),
        }
    }

    env.close();

    let artifacts: Vec<String> = storage
        .artifacts()
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    if !artifacts.is_empty() {
        logger.set_extra("artifacts", json!(artifacts));
    }

    logger.as_record(timestamp, latency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::stub::StubDriver;
    use std::fs;
    use std::path::PathBuf;

    fn write_script(tag: &str, source: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("webrun-scenario-{}-{tag}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scenario.lua");
        fs::write(&path, source).unwrap();
        path
    }

    #[test]
    fn test_scenario_end_to_end() {
        let script = write_script(
            "ok",
            "local t = tab.new('https://example.com')\n\
             print('visited', t:url())\n\
             t:screenshot('front')\n\
             t:close()\n",
        );
        let record = run_scenario(StubDriver::new(), &script, Config::new());
        assert_eq!(record.status, Status::Healthy);
        assert_eq!(record.message, "visited\thttps://example.com");
        let artifacts = record.extra["artifacts"].as_array().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].as_str().unwrap().ends_with("front.png"));
    }

    #[test]
    fn test_scenario_failure_produces_error_extra() {
        let script = write_script("fail", "error('scenario went wrong')\n");
        let record = run_scenario(StubDriver::new(), &script, Config::new());
        assert_eq!(record.status, Status::Failure);
        assert!(record.extra["error"]
            .as_str()
            .unwrap()
            .contains("scenario went wrong"));
    }

    #[test]
    fn test_missing_script_is_a_failure_record() {
        let record = run_scenario(
            StubDriver::new(),
            Path::new("/nonexistent/webrun/missing.lua"),
            Config::new().with_artifact_dir(std::env::temp_dir().join("webrun-missing")),
        );
        assert_eq!(record.status, Status::Failure);
        assert_eq!(record.latency_ms, 0);
        assert!(!record.message.is_empty());
    }
}
