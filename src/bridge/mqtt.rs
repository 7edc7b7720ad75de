//! MQTT ingress: the wire client wrapper and the dispatcher state machine.
//!
//! The dispatcher's topic parsing and routing logic is independent of the
//! wire client so it can be unit-tested without a broker.

use super::json_path;
use super::sinks::{InfluxWriter, SqlWriter};
use crate::config::MqttConfig;
use crate::error::HubError;
use crate::registry::{OrgId, OrgRegistry, Thing, ThingRegistry};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Thin wrapper around the `rumqttc` wire client, used by both the
/// dispatcher's inbound event loop and the packet processor's outbound
/// republishing.
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(config: &MqttConfig) -> (Self, EventLoop) {
        let client_id = format!("piothub-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 100);
        (Self { client }, eventloop)
    }

    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), HubError> {
        self.client
            .publish(topic, QoS::AtMostOne, false, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }

    /// Clone of the underlying wire client, for driving [`Self::run`] from
    /// a separate task while this handle stays with the packet processor.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Run the event loop: subscribe once to `org/+/#` (the dispatcher
    /// resolves org and per-thing topic from the suffix itself, so no
    /// per-thing subscription management is needed) and dispatch every
    /// inbound publish. Reconnect is handled by `rumqttc`.
    pub async fn run(client: AsyncClient, mut eventloop: EventLoop, dispatcher: Arc<MqttDispatcher>) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    if connack.code == rumqttc::ConnectReturnCode::Success {
                        info!("connected to MQTT broker");
                        if let Err(e) = client.subscribe("org/+/#", QoS::AtLeastOnce).await {
                            error!(error = %e, "failed to subscribe");
                        }
                    } else {
                        error!(code = ?connack.code, "MQTT connection rejected");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    debug!(topic = %publish.topic, "dispatching inbound message");
                    dispatcher.dispatch(&publish.topic, &payload).await;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("disconnected from MQTT broker");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT event loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

/// Drives the routing state machine: resolve org from the topic prefix,
/// match the remaining topic against each category's routing index, and
/// dispatch to every thing that matches. Any step's miss drops the message.
pub struct MqttDispatcher {
    things: Arc<ThingRegistry>,
    orgs: Arc<OrgRegistry>,
    influx: Arc<dyn InfluxWriter>,
    sql: Arc<dyn SqlWriter>,
}

impl MqttDispatcher {
    pub fn new(
        things: Arc<ThingRegistry>,
        orgs: Arc<OrgRegistry>,
        influx: Arc<dyn InfluxWriter>,
        sql: Arc<dyn SqlWriter>,
    ) -> Self {
        Self { things, orgs, influx, sql }
    }

    pub async fn dispatch(&self, topic: &str, payload: &str) {
        let Some((org_name, rest)) = parse_org_topic(topic) else {
            debug!(topic, "dropped: does not match org/<name>/... prefix");
            return;
        };

        let org = match self.orgs.find_by_name(org_name).await {
            Ok(org) => org,
            Err(_) => {
                debug!(org = org_name, "dropped: unknown org");
                return;
            }
        };

        for thing in self.things.find_by_measurement_topic(org.id, rest).await {
            self.handle_sensor(thing, payload).await;
        }
        for thing in self.things.find_by_switch_topic(org.id, rest).await {
            self.handle_switch(thing, payload).await;
        }
        if let Ok(thing) = self.things.find_by_telemetry_topic(org.id, rest).await {
            self.handle_telemetry(thing, payload).await;
        }
        if let Ok(thing) = self.things.find_by_location_topic(org.id, rest).await {
            self.handle_location(thing, payload).await;
        }
        if let Ok(thing) = self.things.find_by_availability_topic(org.id, rest).await {
            let _ = self.things.touch(thing.id).await;
        }
    }

    /// JSON dotted-path extraction when `measurement_value` is set, raw
    /// payload otherwise; extraction failure drops the sample silently.
    async fn handle_sensor(&self, thing: Thing, payload: &str) {
        if !thing.is_active() {
            return;
        }
        let Some(sensor) = &thing.sensor else { return };

        let value = match sensor.measurement_value.as_deref() {
            Some(path) if !path.is_empty() => {
                let Ok(json) = serde_json::from_str::<Value>(payload) else {
                    debug!(thing = %thing.name, "dropped: payload is not valid JSON");
                    return;
                };
                let Some(resolved) = json_path::resolve(&json, path) else {
                    debug!(thing = %thing.name, path, "dropped: path did not resolve");
                    return;
                };
                let Some(s) = json_path::scalar_to_string(resolved) else {
                    debug!(thing = %thing.name, path, "dropped: path resolved to non-scalar");
                    return;
                };
                s
            }
            _ => payload.to_string(),
        };

        if thing.store_influxdb {
            self.influx.post_measurement(&thing, &value).await;
        }
        if thing.store_mysqldb {
            self.sql.post_measurement(&thing, &value).await;
        }
        let _ = self.things.touch(thing.id).await;
    }

    /// Compares payload to the switch's on/off literals; anything else is dropped.
    async fn handle_switch(&self, thing: Thing, payload: &str) {
        if !thing.is_active() {
            return;
        }
        let Some(switch) = &thing.switch else { return };
        let matches_on = switch.state_on.as_deref() == Some(payload);
        let matches_off = switch.state_off.as_deref() == Some(payload);
        if !matches_on && !matches_off {
            debug!(thing = %thing.name, payload, "dropped: switch payload not on/off");
            return;
        }

        let _ = self.things.touch(thing.id).await;
        self.influx.post_switch_state(&thing, payload).await;
    }

    async fn handle_telemetry(&self, thing: Thing, payload: &str) {
        if !thing.is_active() {
            return;
        }
        let _ = self.things.set_telemetry(thing.id, payload).await;
        let _ = self.things.touch(thing.id).await;
    }

    async fn handle_location(&self, thing: Thing, payload: &str) {
        if !thing.is_active() {
            return;
        }
        let Ok(json) = serde_json::from_str::<Value>(payload) else {
            debug!(thing = %thing.name, "dropped: location payload is not valid JSON");
            return;
        };

        let lat_key = thing.location_lat_value.as_deref().unwrap_or("lat");
        let lng_key = thing.location_lng_value.as_deref().unwrap_or("lng");
        let sat_key = thing.location_sat_value.as_deref().unwrap_or("sat");

        let Some(lat) = json.get(lat_key).and_then(Value::as_f64) else {
            debug!(thing = %thing.name, "dropped: location payload missing lat");
            return;
        };
        let Some(lng) = json.get(lng_key).and_then(Value::as_f64) else {
            debug!(thing = %thing.name, "dropped: location payload missing lng");
            return;
        };
        let sats = json.get(sat_key).and_then(Value::as_i64);

        let ts = match thing.location_date_value.as_deref() {
            Some(date_key) if !date_key.is_empty() => json
                .get(date_key)
                .and_then(Value::as_i64)
                .unwrap_or_else(|| Utc::now().timestamp()),
            _ => Utc::now().timestamp(),
        };

        let _ = self.things.set_location(thing.id, lat, lng, sats, ts).await;
        let _ = self.things.touch(thing.id).await;

        if thing.location_tracking && thing.org_id.is_some() {
            self.influx.post_location(&thing, lat, lng, sats, ts * 1000).await;
        }
    }
}

/// Parses `org/<orgName>/<rest>` topics.
fn parse_org_topic(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix("org/")?;
    rest.split_once('/')
}
