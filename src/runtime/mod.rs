//! Embedding runtime for Lua scenario scripts on a concurrent host.
//!
//! One [`Environment`] owns a single interpreter instance. All access to
//! interpreter state is serialized through an exclusive execution handle;
//! blocking host work runs through the async bridge ([`Environment::run_async`],
//! [`Environment::yield_now`]), host-originated events re-enter through
//! [`Environment::dispatch`], and the top-level supervisor
//! ([`Environment::run`]) races a script against fatal errors escalated from
//! dispatched callbacks. Values cross the boundary through the
//! [`value::Value`] model and the [`convert`] marshaller.

pub mod config;
pub mod convert;
pub mod environment;
pub mod error;
pub mod handle;
pub mod tasks;
pub mod value;

pub use config::Config;
pub use environment::{Environment, SubContext};
pub use error::{Error, HostError};
pub use handle::ExecHandle;
pub use value::Value;
