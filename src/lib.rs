pub mod cli;
pub mod dispatch;
pub mod error;
pub mod manifest;
pub mod ops;
pub mod query;
pub mod render;
pub mod resolve;
pub mod snapshot;
