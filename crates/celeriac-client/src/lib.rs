//! Celeriac Client - submit Celery tasks and collect their results
//!
//! ```no_run
//! use celeriac_client::{Celery, PostOptions};
//! use celeriac_core::ConnectionDescriptor;
//! use serde_json::json;
//!
//! # async fn run() -> celeriac_core::Result<()> {
//! let mut celery = Celery::new(ConnectionDescriptor::new("localhost", "guest", "guest", "/"))?;
//! let submitted = celery.post_task("tasks.add", json!([2, 2]), PostOptions::new()).await?;
//! if let Some(mut result) = submitted.into_result() {
//!     let sum = result.get_with_defaults().await?;
//!     println!("2 + 2 = {}", sum);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
mod observe;
pub mod producer;
pub mod result;

pub use client::{Celery, PostOptions, Submitted};
pub use producer::TaskProducer;
pub use result::{AsyncResult, DEFAULT_GET_INTERVAL, DEFAULT_GET_TIMEOUT};
