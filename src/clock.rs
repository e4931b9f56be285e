//! The `time` script type: wall-clock reads, interruptible sleeps and
//! formatting, plus the millisecond unit constants.

use crate::runtime::environment::Environment;
use crate::runtime::error::HostError;
use chrono::Utc;
use mlua::{Function, Table, Value as LuaValue};
use std::sync::{Arc, Weak};
use std::time::Duration;

const MILLISECOND: i64 = 1;
const SECOND: i64 = 1000 * MILLISECOND;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const YEAR: i64 = 365 * DAY;

fn upgrade(weak: &Weak<Environment>) -> mlua::Result<Arc<Environment>> {
    weak.upgrade()
        .ok_or_else(|| HostError::other("environment is shut down").into_lua())
}

pub fn register(env: &Arc<Environment>) -> mlua::Result<()> {
    let lua = env.lua();

    let now = {
        let weak = Arc::downgrade(env);
        lua.create_function(move |_, ()| {
            let env = upgrade(&weak)?;
            env.yield_now();
            Ok(Utc::now().timestamp_millis())
        })?
    };

    // A timer run through the bridge: the handle is free for the whole
    // sleep, and ambient cancellation interrupts the wait.
    let sleep = {
        let weak = Arc::downgrade(env);
        lua.create_function(move |_, ms: f64| {
            let env = upgrade(&weak)?;
            let duration = Duration::from_secs_f64(ms.max(0.0) / 1000.0);
            env.run_async(|| {
                env.wait(async move {
                    tokio::time::sleep(duration).await;
                    Ok(())
                })
            })
        })?
    };

    let format = lua.create_function(|lua, (ms, fmt): (f64, Option<String>)| {
        let fmt = fmt.unwrap_or_else(|| "%Y-%m-%dT%H:%M:%S%z".to_string());
        let date: Function = lua.globals().get::<Table>("os")?.get("date")?;
        date.call::<String>((fmt, ms / 1000.0))
    })?;

    env.register_type(
        "time",
        vec![("now", now), ("sleep", sleep), ("format", format)],
        vec![
            ("millisecond", LuaValue::Integer(MILLISECOND)),
            ("second", LuaValue::Integer(SECOND)),
            ("minute", LuaValue::Integer(MINUTE)),
            ("hour", LuaValue::Integer(HOUR)),
            ("day", LuaValue::Integer(DAY)),
            ("week", LuaValue::Integer(WEEK)),
            ("year", LuaValue::Integer(YEAR)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Logger;
    use crate::runtime::Config;
    use crate::storage::testing::temp_storage;
    use std::time::Instant;

    fn test_env(tag: &str) -> Arc<Environment> {
        let env = Environment::new(temp_storage(tag), Arc::new(Logger::new(false)), Config::new())
            .unwrap();
        register(&env).unwrap();
        env
    }

    #[test]
    fn test_now_is_milliseconds() {
        let env = test_env("clock-now");
        env.run("stamp = time.now()", "test").unwrap();
        let stamp: i64 = env.lua().globals().get("stamp").unwrap();
        let now = Utc::now().timestamp_millis();
        assert!((now - stamp).abs() < 60 * 1000, "stamp {stamp} vs now {now}");
    }

    #[test]
    fn test_sleep_actually_sleeps() {
        let env = test_env("clock-sleep");
        let start = Instant::now();
        env.run("time.sleep(50)", "test").unwrap();
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_unit_constants() {
        let env = test_env("clock-units");
        env.run(
            "assert(time.second == 1000) assert(time.minute == 60 * time.second) assert(time.day == 24 * time.hour)",
            "test",
        )
        .unwrap();
    }

    #[test]
    fn test_format_delegates_to_os_date() {
        let env = test_env("clock-format");
        env.run(
            "formatted = time.format(0, '!%Y-%m-%d')",
            "test",
        )
        .unwrap();
        let formatted: String = env.lua().globals().get("formatted").unwrap();
        assert_eq!(formatted, "1970-01-01");
    }
}
