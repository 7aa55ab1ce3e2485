//! Execution substrate shared by all pipeline stages

pub mod batch;
pub mod validate;
