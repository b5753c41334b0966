//! Domain: a hostname routed to an application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: String,
    pub application_id: String,
    pub hostname: String,
    pub is_primary: bool,
    pub ssl_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Auto-generated hostname for an application: `{app-name}.{base-domain}`.
pub fn auto_subdomain(app_name: &str, base_domain: &str) -> String {
    format!("{}.{}", app_name, base_domain)
}
