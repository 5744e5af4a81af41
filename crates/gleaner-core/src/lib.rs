pub mod action;
pub mod collector;
pub mod config;
mod engine;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod id;
pub mod io;
pub mod model;
pub mod noticer;
pub mod orchestrator;
pub mod paths;
pub mod status;
pub mod store;

#[cfg(test)]
mod testutil;

pub use error::{GleanerError, Result};
pub use id::Id;
pub use orchestrator::Gleaner;
