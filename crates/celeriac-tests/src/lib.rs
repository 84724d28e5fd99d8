//! Celeriac Integration Tests
//!
//! Fixtures plus tests that drive the client against an in-memory broker.
//! Run with: `cargo test -p celeriac-tests`
//!
//! Tests needing a live broker are ignored by default:
//! ```sh
//! docker run -d -p 6379:6379 redis:7-alpine
//! docker run -d -p 5672:5672 rabbitmq:3
//! cargo test -p celeriac-tests -- --ignored
//! ```

pub mod common;
