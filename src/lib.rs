pub mod config;
pub mod device;
pub mod error;
pub mod request;
pub mod session;
pub mod wire;

#[cfg(test)]
mod testing;

pub use error::{AppError, Result};
