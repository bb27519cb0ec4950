//! Protocol layer of the SeAT connector for Mirai HTTP bridges.
//!
//! The crate is transport-agnostic. HTTP goes through the [`transport::Fetcher`]
//! port, rate-limit state through [`throttle::RateLimitStore`], settings
//! through [`config::SettingsStore`]; adapters live in sibling crates.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod driver;
pub mod errors;
pub mod handle;
pub mod logging;
pub mod mirror;
pub mod session;
pub mod throttle;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::MiraiDriver;
pub use errors::{DriverError, Error, Result};
pub use handle::DriverHandle;
