pub mod chart;
pub mod cli;
pub mod config;
pub(crate) mod convert;
pub mod embed;
mod error;
pub mod extract;
pub mod io_utils;
pub(crate) mod linalg;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod reduce;
pub mod table;
pub mod template;
pub mod topics;

pub use error::{AppError, AppResult};
