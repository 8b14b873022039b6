//! # harbor-daemon
//!
//! Long-running host process for Harbor sandboxes. It builds a
//! [`harbor_core::Runtime`] from environment configuration, starts the
//! configured warm pools and sweeps idle and expired sandboxes until told to
//! stop.

pub mod config;
mod daemon;

pub use config::{ConfigError, DaemonConfig, PoolSpec};
pub use daemon::Daemon;
