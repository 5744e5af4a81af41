pub mod action;
pub mod config;
pub mod feed;
pub mod filter;
pub mod queue;
pub mod serve;
pub mod source;
pub mod source_type;
