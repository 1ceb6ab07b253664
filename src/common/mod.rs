//! Common utilities shared between collector and worker modes

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
