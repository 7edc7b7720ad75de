//! Org model.

use super::thing::OrgId;
use serde::{Deserialize, Serialize};

/// Tenant boundary; owns things and sink credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: OrgId,
    pub name: String,
    pub influxdb: String,
    pub influxdb_username: String,
    pub influxdb_password: String,
    pub mysqldb: String,
    pub mysqldb_username: String,
    pub mysqldb_password: String,
}
