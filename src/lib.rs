//! Ployer Library
//!
//! A lightweight self-hosted PaaS: applications registered with a git URL
//! are cloned, built into container images, run behind a TLS-terminating
//! reverse proxy, and kept alive by health checks.

pub mod app;
pub mod bus;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod gitops;
pub mod logs;
pub mod models;
pub mod monitor;
pub mod proxy;
pub mod reconcile;
pub mod runtime;
pub mod secrets;
pub mod server;
pub mod store;
pub mod utils;
pub mod webhooks;
