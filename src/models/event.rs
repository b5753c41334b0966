//! Events published on the in-process bus and forwarded to stream subscribers

use serde::{Deserialize, Serialize};

use crate::models::{AppStatus, DeploymentStatus, HealthStatus, ServerStatus};

/// Bus topic names. Topics are plain strings; these helpers keep the format
/// in one place.
pub struct Topics;

impl Topics {
    pub fn deployment(deployment_id: &str) -> String {
        format!("deployment:{}", deployment_id)
    }

    pub fn container_logs(container_id: &str) -> String {
        format!("container:{}:logs", container_id)
    }

    pub fn container_stats(container_id: &str) -> String {
        format!("container:{}:stats", container_id)
    }

    pub fn server(server_id: &str) -> String {
        format!("server:{}", server_id)
    }

    pub fn app(application_id: &str) -> String {
        format!("app:{}", application_id)
    }
}

/// A single event as carried on the bus and serialized to stream subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DeploymentStatus {
        deployment_id: String,
        application_id: String,
        status: DeploymentStatus,
    },
    DeploymentLog {
        deployment_id: String,
        line: String,
    },
    ContainerLog {
        container_id: String,
        line: String,
    },
    ContainerStats {
        container_id: String,
        cpu_percent: f64,
        memory_mb: f64,
        memory_limit_mb: Option<f64>,
    },
    AppHealth {
        application_id: String,
        status: HealthStatus,
    },
    AppStatus {
        application_id: String,
        status: AppStatus,
    },
    RouteError {
        application_id: String,
        hostname: String,
        message: String,
    },
    ServerStatus {
        server_id: String,
        status: ServerStatus,
    },
}

impl Event {
    /// Canonical topic the event is published on.
    pub fn topic(&self) -> String {
        match self {
            Event::DeploymentStatus { deployment_id, .. }
            | Event::DeploymentLog { deployment_id, .. } => Topics::deployment(deployment_id),
            Event::ContainerLog { container_id, .. } => Topics::container_logs(container_id),
            Event::ContainerStats { container_id, .. } => Topics::container_stats(container_id),
            Event::AppHealth { application_id, .. }
            | Event::AppStatus { application_id, .. }
            | Event::RouteError { application_id, .. } => Topics::app(application_id),
            Event::ServerStatus { server_id, .. } => Topics::server(server_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_format() {
        assert_eq!(Topics::deployment("d-1"), "deployment:d-1");
        assert_eq!(Topics::container_logs("c-2"), "container:c-2:logs");
        assert_eq!(Topics::container_stats("c-2"), "container:c-2:stats");
        assert_eq!(Topics::app("a-3"), "app:a-3");
        assert_eq!(Topics::server("s-4"), "server:s-4");
    }

    #[test]
    fn test_event_topic_matches_payload() {
        let event = Event::DeploymentLog {
            deployment_id: "d-9".to_string(),
            line: "building".to_string(),
        };
        assert_eq!(event.topic(), "deployment:d-9");
    }
}
