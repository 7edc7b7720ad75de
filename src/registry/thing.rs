//! Thing model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque, stable-across-restarts identifier for a [`Thing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThingId(pub i64);

impl ThingId {
    /// Lowercase hex rendering used in InfluxDB line-protocol tags (`id=<hex>`).
    pub fn hex(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl std::fmt::Display for ThingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for an [`crate::registry::Org`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(pub i64);

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of a [`Thing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThingType {
    Device,
    Sensor,
    Switch,
}

impl ThingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThingType::Device => "device",
            ThingType::Sensor => "sensor",
            ThingType::Switch => "switch",
        }
    }
}

impl std::str::FromStr for ThingType {
    type Err = crate::error::HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(ThingType::Device),
            "sensor" => Ok(ThingType::Sensor),
            "switch" => Ok(ThingType::Switch),
            other => Err(crate::error::HubError::Internal(format!(
                "unknown thing type: {other}"
            ))),
        }
    }
}

/// Sensor sub-record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorInfo {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub measurement_topic: Option<String>,
    /// Dotted JSON path, e.g. "DS18B20.Temperature".
    #[serde(default)]
    pub measurement_value: Option<String>,
}

/// Switch sub-record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchInfo {
    #[serde(default)]
    pub state_topic: Option<String>,
    #[serde(default)]
    pub state_on: Option<String>,
    #[serde(default)]
    pub state_off: Option<String>,
    #[serde(default)]
    pub command_topic: Option<String>,
    #[serde(default)]
    pub command_on: Option<String>,
    #[serde(default)]
    pub command_off: Option<String>,
}

/// A device, sensor, or switch tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing {
    pub id: ThingId,
    pub piot_id: String,
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(rename = "type")]
    pub kind: ThingType,
    #[serde(default)]
    pub org_id: Option<OrgId>,
    #[serde(default)]
    pub parent_id: Option<ThingId>,
    pub enabled: bool,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub availability_topic: Option<String>,
    #[serde(default)]
    pub availability_yes: Option<String>,
    #[serde(default)]
    pub availability_no: Option<String>,

    #[serde(default)]
    pub telemetry_topic: Option<String>,
    #[serde(default)]
    pub telemetry: Option<String>,

    #[serde(default)]
    pub location_topic: Option<String>,
    #[serde(default)]
    pub location_lat_value: Option<String>,
    #[serde(default)]
    pub location_lng_value: Option<String>,
    #[serde(default)]
    pub location_sat_value: Option<String>,
    #[serde(default)]
    pub location_date_value: Option<String>,
    #[serde(default)]
    pub location_tracking: bool,
    #[serde(default)]
    pub location_latitude: Option<f64>,
    #[serde(default)]
    pub location_longitude: Option<f64>,
    #[serde(default)]
    pub location_satellites: Option<i64>,
    #[serde(default)]
    pub location_ts: Option<i64>,

    #[serde(default)]
    pub store_influxdb: bool,
    #[serde(default)]
    pub store_mysqldb: bool,

    #[serde(default)]
    pub sensor: Option<SensorInfo>,
    #[serde(default)]
    pub switch: Option<SwitchInfo>,
}

impl Thing {
    /// Display name used in line-protocol tags: alias when set, else name.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().filter(|a| !a.is_empty()).unwrap_or(&self.name)
    }

    /// Only assigned, enabled things may cause sink writes or publishes.
    pub fn is_active(&self) -> bool {
        self.enabled && self.org_id.is_some()
    }
}
