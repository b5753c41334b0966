//! Domain entities shared across the store, the orchestrator and the API

pub mod application;
pub mod deployment;
pub mod domain;
pub mod event;
pub mod health;
pub mod server;
pub mod stats;
pub mod webhook;

pub use application::{AppStatus, Application, BuildStrategy, DeployKey, EnvironmentVariable};
pub use deployment::{Deployment, DeploymentStatus};
pub use domain::Domain;
pub use event::{Event, Topics};
pub use health::{HealthCheck, HealthCheckResult, HealthStatus};
pub use server::{Server, ServerStatus};
pub use stats::ContainerStats;
pub use webhook::{Webhook, WebhookDelivery, WebhookDeliveryStatus, WebhookProvider};
