//! CLI command implementations

pub mod network;
