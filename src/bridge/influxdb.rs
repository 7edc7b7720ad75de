//! InfluxDB line-protocol-over-HTTP sink.
//!
//! Targets the legacy InfluxDB 1.x `/write?db=` endpoint with HTTP basic
//! auth, not the InfluxDB 2.x `/api/v2/write` endpoint.

use super::line_protocol::{self, FieldValue};
use super::sinks::InfluxWriter;
use crate::config::InfluxDbConfig;
use crate::error::HubError;
use crate::registry::{OrgRegistry, Thing, ThingType};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Writes normalized samples to the time-series store.
///
/// Errors from org lookup or HTTP transport are logged and swallowed —
/// telemetry ingestion must not stall on a single unreachable sink.
pub struct InfluxSink {
    client: reqwest::Client,
    base_uri: String,
    username: String,
    password: String,
    orgs: Arc<OrgRegistry>,
}

impl InfluxSink {
    pub fn new(config: &InfluxDbConfig, orgs: Arc<OrgRegistry>) -> Result<Self, HubError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_uri: config.uri.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            orgs,
        })
    }

    async fn write(&self, thing: &Thing, line: String) {
        let Some(org_id) = thing.org_id else { return };

        let org = match self.orgs.get(org_id).await {
            Ok(org) => org,
            Err(e) => {
                debug!(thing = %thing.name, error = %e, "influx write skipped: org lookup failed");
                return;
            }
        };

        let url = format!("{}/write?db={}", self.base_uri, org.influxdb);
        debug!(url, line, "posting to InfluxDB");

        let result = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .body(line)
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                error!(status = %resp.status(), url, "InfluxDB write rejected");
            }
            Err(e) => {
                error!(error = %e, url, "InfluxDB write failed");
            }
            Ok(_) => {}
        }
    }
}

/// Render a sensor/switch value string as a typed line-protocol field:
/// integers and decimals are written bare (no quotes), anything else is a
/// quoted string field.
fn value_field(value: &str) -> FieldValue {
    if let Ok(i) = value.parse::<i64>() {
        FieldValue::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        FieldValue::Float(f)
    } else {
        FieldValue::String(value.to_string())
    }
}

#[async_trait]
impl InfluxWriter for InfluxSink {
    /// No-op for things that aren't sensors.
    async fn post_measurement(&self, thing: &Thing, value: &str) {
        if thing.kind != ThingType::Sensor {
            return;
        }
        let Some(sensor) = &thing.sensor else { return };
        let class = sensor.class.as_deref().unwrap_or("");

        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), thing.id.hex());
        tags.insert("name".to_string(), thing.display_name().to_string());
        tags.insert("class".to_string(), class.to_string());

        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value_field(value));

        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        match line_protocol::encode_line("sensor", &tags, &fields, now_ns) {
            Ok(line) => self.write(thing, line).await,
            Err(e) => error!(thing = %thing.name, error = %e, "failed to encode measurement"),
        }
    }

    /// Maps `value` to 1/0 against the switch's on/off literals; no-op
    /// for non-switch things or values outside {on, off}.
    async fn post_switch_state(&self, thing: &Thing, value: &str) {
        if thing.kind != ThingType::Switch {
            return;
        }
        let Some(switch) = &thing.switch else { return };

        let mapped = match (&switch.state_on, &switch.state_off) {
            (Some(on), _) if value == on => 1i64,
            (_, Some(off)) if value == off => 0i64,
            _ => return,
        };

        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), thing.id.hex());
        tags.insert("name".to_string(), thing.display_name().to_string());

        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), FieldValue::Int(mapped));

        let now_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        match line_protocol::encode_line("switch", &tags, &fields, now_ns) {
            Ok(line) => self.write(thing, line).await,
            Err(e) => error!(thing = %thing.name, error = %e, "failed to encode switch state"),
        }
    }

    async fn post_location(&self, thing: &Thing, lat: f64, lng: f64, sats: Option<i64>, ts_millis: i64) {
        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), thing.id.hex());
        tags.insert("name".to_string(), thing.display_name().to_string());

        let mut fields = BTreeMap::new();
        fields.insert("lat".to_string(), FieldValue::Float(lat));
        fields.insert("lng".to_string(), FieldValue::Float(lng));
        if let Some(sats) = sats {
            fields.insert("sat".to_string(), FieldValue::Int(sats));
        }

        match line_protocol::encode_line("location", &tags, &fields, ts_millis * 1_000_000) {
            Ok(line) => self.write(thing, line).await,
            Err(e) => error!(thing = %thing.name, error = %e, "failed to encode location"),
        }
    }
}
