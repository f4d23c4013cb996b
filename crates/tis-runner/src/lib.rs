//! tisctl
//!
//! Command-line controller for TIS networks: a UDP [`Transport`](tis_engine::Transport)
//! adapter, YAML configuration and the `listen`, `discover`, `scan`, `send`,
//! `light` and `decode` commands.

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod udp;

pub use cli::{Cli, Command};
pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use logging::init_logging;
pub use udp::UdpTransport;
