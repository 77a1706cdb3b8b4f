#![deny(clippy::unwrap_used)]

pub mod batch;
pub mod cache;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod endpoint;
pub mod grouping;
pub mod invoice;
pub mod mapping_store;
pub mod payload;
pub mod remote;
pub mod resolver;
pub mod submission;
pub mod tabular;
pub mod text;
pub mod transport;
pub mod unit;
pub mod variants;
