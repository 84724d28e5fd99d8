//! Celeriac Core - Core types for submitting Celery tasks from Rust
//!
//! This crate provides the fundamental building blocks for Celeriac:
//! - Connection descriptors and backend names
//! - Task envelopes and argument classification
//! - Result message types
//! - Error types

pub mod config;
pub mod error;
pub mod message;
pub mod task;
pub mod tls;

pub use config::{BackendKind, CeleriacConfig, ConnectionDescriptor, LoggingSettings, AUTO_BACKEND};
pub use error::{Error, Result};
pub use message::{PublishProperties, ResultBody, ResultMessage, TaskState};
pub use task::{TaskArguments, TaskEnvelope, TaskId, TaskOptions, TimeParam};
pub use tls::{TlsConfigError, TlsOptions};
