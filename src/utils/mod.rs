//! The `utils` module collects the pieces shared by every other module:
//! the crate-wide error type and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{LifecycleError, Result};

#[cfg(test)]
mod tests;
