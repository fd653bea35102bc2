//! # TenantGate API Server Library
//!
//! HTTP surface over the tenant-isolation core.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `metrics`: Prometheus counters for requests, rate limiting and the cache
//! - `middleware`: Authentication, rate limiting, request context, security headers
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
