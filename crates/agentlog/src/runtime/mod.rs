//! Runtime module: logging, boot and shutdown.

pub mod boot;
pub mod stop;
