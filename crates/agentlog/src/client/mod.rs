//! Client module: collaborator interfaces the capture pipeline depends on.
//!
//! `ops.rs` defines the traits, `docker.rs` tails containers through the
//! docker CLI and `memory.rs` holds in-memory implementations.

pub mod ops;
pub mod docker;
pub mod memory;
pub mod error;

pub use ops::{Conversation, ContainerTail, ExecutionOps, ResultStore, StoredResult, TaskStore};
pub use docker::DockerCli;
pub use error::StoreError;
