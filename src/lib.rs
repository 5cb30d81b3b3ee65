pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod ssh;
pub mod util;

pub use error::{Error, Result};
