//! Relational sink: inserts one measurement row per org's
//! MySQL database. Same silent-swallow failure policy as [`super::influxdb::InfluxSink`].

use super::sinks::SqlWriter;
use crate::config::SqlConfig;
use crate::registry::{OrgRegistry, Thing, ThingType};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

const CREATE_MEASUREMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS measurements (
    thing_id BIGINT NOT NULL,
    value TEXT NOT NULL,
    ts DATETIME NOT NULL
)"#;

/// Inserts `(thing_id, value, timestamp)` rows into a per-org MySQL
/// database. One lazily-connected pool per org, cached by org id.
pub struct SqlSink {
    host: String,
    port: u16,
    orgs: Arc<OrgRegistry>,
    pools: RwLock<HashMap<i64, MySqlPool>>,
}

impl SqlSink {
    pub fn new(config: &SqlConfig, orgs: Arc<OrgRegistry>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            orgs,
            pools: RwLock::new(HashMap::new()),
        }
    }

    async fn pool_for(&self, org_id: crate::registry::OrgId) -> Option<MySqlPool> {
        if let Some(pool) = self.pools.read().await.get(&org_id.0) {
            return Some(pool.clone());
        }

        let org = match self.orgs.get(org_id).await {
            Ok(org) => org,
            Err(e) => {
                debug!(error = %e, "sql write skipped: org lookup failed");
                return None;
            }
        };

        let dsn = format!(
            "mysql://{}:{}@{}:{}/{}",
            org.mysqldb_username, org.mysqldb_password, self.host, self.port, org.mysqldb
        );

        let pool = match MySqlPoolOptions::new().max_connections(5).connect(&dsn).await {
            Ok(pool) => pool,
            Err(e) => {
                error!(error = %e, org = %org.name, "failed to connect to MySQL sink");
                return None;
            }
        };

        if let Err(e) = sqlx::query(CREATE_MEASUREMENTS_TABLE).execute(&pool).await {
            error!(error = %e, org = %org.name, "failed to create measurements table");
            return None;
        }

        self.pools.write().await.insert(org_id.0, pool.clone());
        Some(pool)
    }
}

#[async_trait]
impl SqlWriter for SqlSink {
    /// No-op for things that aren't sensors.
    async fn post_measurement(&self, thing: &Thing, value: &str) {
        if thing.kind != ThingType::Sensor {
            return;
        }
        let Some(org_id) = thing.org_id else { return };
        let Some(pool) = self.pool_for(org_id).await else { return };

        let result = sqlx::query("INSERT INTO measurements (thing_id, value, ts) VALUES (?, ?, ?)")
            .bind(thing.id.0)
            .bind(value)
            .bind(Utc::now().naive_utc())
            .execute(&pool)
            .await;

        if let Err(e) = result {
            error!(thing = %thing.name, error = %e, "SQL measurement insert failed");
        }
    }
}
