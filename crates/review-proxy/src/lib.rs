//! review-proxy: a front door for a pipeline's review apps.
//!
//! Each inbound request re-discovers the live review apps through the
//! control-plane API, is replayed against all of them concurrently, and the
//! best response is relayed back.
//!
//! - [`discovery`]: control-plane lookups producing [`discovery::Endpoint`]s
//! - [`dispatch`]: concurrent fan-out with per-call deadlines
//! - [`select`]: response selection policy
//! - [`handler`]: per-request orchestration
//! - [`server`]: axum wiring

pub mod config;
pub mod correlation;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod select;
pub mod server;
pub mod stats;
