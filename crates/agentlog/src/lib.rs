// Execution-log capture and result extraction for agent sessions.

// Core
pub mod parser;
pub mod conf;

// Collaborators and services
pub mod client;
pub mod service;

// Process lifecycle
pub mod runtime;
