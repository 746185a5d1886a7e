//! # Courier Gateway
//!
//! HTTP API over the scheduler and rule evaluator. Thin by design: every
//! handler parses a request, calls one scheduler/evaluator/store operation,
//! and renders the result as JSON — no business logic lives here.

pub mod routes;
pub mod server;

pub use server::{build_router, start, AppState};
