pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod oanda;
pub mod queue;
pub mod scaling;
pub mod telemetry;

pub use error::{Result, TidepoolError};
