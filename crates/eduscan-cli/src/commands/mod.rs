//! Command implementations for eduscan

pub mod auth;
pub mod scan;

pub use scan::{scan, ScanRequest};
