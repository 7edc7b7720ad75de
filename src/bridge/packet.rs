//! HTTP packet endpoint.
//!
//! Auto-registers devices and sensors, applies the DoS gate, and
//! republishes packet contents as synthetic MQTT messages via the same
//! [`MqttPublisher`] the dispatcher's wire client uses.

use super::mqtt::MqttPublisher;
use crate::error::HubError;
use crate::registry::{ThingRegistry, ThingType};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Packet body.
#[derive(Debug, Clone, Deserialize)]
pub struct PiotPacket {
    pub device: String,
    #[serde(default)]
    pub wifi_ssid: Option<String>,
    #[serde(default)]
    pub readings: Vec<Reading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reading {
    pub address: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
}

/// `device -> lastAcceptedAt` gate.
///
/// Guarded by a single mutex — writes are microsecond-scale. The map
/// never shrinks; it is bounded by the number of distinct devices ever
/// seen, which correctness does not require evicting.
pub struct DosGate {
    min_interval: Duration,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl DosGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` (and records `now`) if a packet for `device` is
    /// allowed through; `false` if one was already accepted within the
    /// configured minimum interval.
    async fn admit(&self, device: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_accepted.lock().await;
        if let Some(last) = map.get(device)
            && now.duration_since(*last) < self.min_interval
        {
            return false;
        }
        map.insert(device.to_string(), now);
        true
    }
}

/// Measurement kind, letter prefix, and published unit for each populated
/// reading field.
const READING_KINDS: [(&str, &str, &str); 3] = [
    ("T", "temperature", "C"),
    ("P", "pressure", "hPa"),
    ("H", "humidity", "%"),
];

pub struct PacketProcessor {
    things: Arc<ThingRegistry>,
    publisher: Arc<MqttPublisher>,
    dos: DosGate,
}

impl PacketProcessor {
    pub fn new(things: Arc<ThingRegistry>, publisher: Arc<MqttPublisher>, min_interval: Duration) -> Self {
        Self {
            things,
            publisher,
            dos: DosGate::new(min_interval),
        }
    }

    pub async fn process(&self, packet: &PiotPacket) -> Result<(), HubError> {
        if !self.dos.admit(&packet.device).await {
            return Err(HubError::TooManyRequests);
        }

        let device = self.things.register_piot(&packet.device, ThingType::Device).await?;
        if device.availability_topic.is_none() {
            self.things.set_availability_topic(device.id, "available").await?;
        }
        let device = self.things.touch(device.id).await?;

        // Auto-registration happens regardless of org assignment; only the
        // publish fan-out below is gated on it.
        let mut populated_readings = Vec::new();
        for reading in &packet.readings {
            for (letter, class, unit) in READING_KINDS {
                let value = match class {
                    "temperature" => reading.temperature,
                    "pressure" => reading.pressure,
                    "humidity" => reading.humidity,
                    _ => None,
                };
                let Some(value) = value else { continue };

                let sensor_name = format!("{letter}{}", reading.address);
                self.ensure_sensor(&sensor_name, class, device.id).await?;
                populated_readings.push((sensor_name, value, unit));
            }
        }

        if device.org_id.is_some() {
            self.publisher.publish("available", "yes").await.ok();
            if let Some(ssid) = &packet.wifi_ssid {
                self.publisher.publish("net/wifi/ssid", ssid).await.ok();
            }
            for (sensor_name, value, unit) in &populated_readings {
                self.publisher.publish("available", "yes").await.ok();
                let formatted = format_reading_value(*value);
                self.publisher.publish("value", &formatted).await.ok();
                self.publisher.publish("value/unit", unit).await.ok();
                debug!(sensor = %sensor_name, value = %formatted, "republished reading");
            }
        }

        Ok(())
    }

    /// Ensure a sensor Thing exists for `name` with the given class and
    /// measurement topic, and reassign its parent if the device has
    /// changed (supports sensor migration).
    async fn ensure_sensor(
        &self,
        name: &str,
        class: &str,
        device_id: crate::registry::ThingId,
    ) -> Result<crate::registry::Thing, HubError> {
        let sensor = self.things.register_piot(name, ThingType::Sensor).await?;

        if sensor.sensor.as_ref().and_then(|s| s.class.as_deref()) != Some(class) {
            self.things.set_sensor_class(sensor.id, class).await?;
        }
        if sensor
            .sensor
            .as_ref()
            .and_then(|s| s.measurement_topic.as_deref())
            != Some("value")
        {
            self.things.set_sensor_measurement_topic(sensor.id, "value").await?;
        }
        if sensor.availability_topic.is_none() {
            self.things.set_availability_topic(sensor.id, "available").await?;
        }
        if sensor.parent_id != Some(device_id) {
            self.things.set_parent(sensor.id, device_id).await?;
        }

        self.things.get(sensor.id).await
    }
}

/// Shortest round-trippable decimal form of a reading value, reused here
/// for the republished `value` topic.
fn format_reading_value(value: f64) -> String {
    super::json_path::scalar_to_string(&serde_json::json!(value)).unwrap_or_else(|| value.to_string())
}

/// Maps [`HubError`] to an HTTP status code.
struct ApiError(HubError);

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HubError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HubError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "packet processing failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

async fn handle_packet(
    State(processor): State<Arc<PacketProcessor>>,
    body: Result<Json<PiotPacket>, axum::extract::rejection::JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(packet) = body.map_err(|e| ApiError(HubError::BadRequest(e.to_string())))?;
    processor.process(&packet).await?;
    Ok(StatusCode::OK)
}

async fn handle_healthz() -> StatusCode {
    StatusCode::OK
}

/// Build the `axum` router: `POST /packet` plus a `GET
/// /healthz` ambient liveness endpoint.
pub fn router(processor: Arc<PacketProcessor>) -> Router {
    Router::new()
        .route("/packet", post(handle_packet))
        .route("/healthz", get(handle_healthz))
        .with_state(processor)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn processor() -> (Arc<PacketProcessor>, Arc<ThingRegistry>) {
        let things = Arc::new(ThingRegistry::connect("sqlite::memory:").await.unwrap());
        let config = crate::config::MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
        };
        let (publisher, _eventloop) = MqttPublisher::new(&config);
        let processor = Arc::new(PacketProcessor::new(
            things.clone(),
            Arc::new(publisher),
            Duration::from_millis(1000),
        ));
        (processor, things)
    }

    #[tokio::test]
    async fn test_dos_gate_admits_first_rejects_second_same_device() {
        let (processor, _things) = processor().await;
        let packet = PiotPacket {
            device: "device01".to_string(),
            wifi_ssid: None,
            readings: vec![],
        };

        assert!(processor.process(&packet).await.is_ok());
        assert!(matches!(
            processor.process(&packet).await,
            Err(HubError::TooManyRequests)
        ));
    }

    #[tokio::test]
    async fn test_dos_gate_per_device_not_global() {
        let (processor, _things) = processor().await;
        let p1 = PiotPacket { device: "device01".to_string(), wifi_ssid: None, readings: vec![] };
        let p2 = PiotPacket { device: "device02".to_string(), wifi_ssid: None, readings: vec![] };

        assert!(processor.process(&p1).await.is_ok());
        assert!(processor.process(&p2).await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_register_device_and_sensor() {
        let (processor, things) = processor().await;
        let packet = PiotPacket {
            device: "device01".to_string(),
            wifi_ssid: None,
            readings: vec![Reading {
                address: "Sensortest.Addr".to_string(),
                temperature: Some(4.5),
                humidity: None,
                pressure: None,
            }],
        };

        processor.process(&packet).await.unwrap();

        let device = things.find_by_name("device01").await.unwrap();
        assert_eq!(device.availability_topic.as_deref(), Some("available"));

        let sensor = things.find_by_name("TSensortest.Addr").await.unwrap();
        assert_eq!(sensor.kind, ThingType::Sensor);
        assert_eq!(sensor.sensor.as_ref().unwrap().class.as_deref(), Some("temperature"));
        assert_eq!(sensor.parent_id, Some(device.id));
    }

    #[tokio::test]
    async fn test_sensor_reparenting() {
        let (processor, things) = processor().await;
        let reading = Reading {
            address: "S".to_string(),
            temperature: Some(1.0),
            humidity: None,
            pressure: None,
        };

        processor
            .process(&PiotPacket { device: "A".to_string(), wifi_ssid: None, readings: vec![reading.clone()] })
            .await
            .unwrap();
        let device_a = things.find_by_name("A").await.unwrap();
        let sensor = things.find_by_name("TS").await.unwrap();
        assert_eq!(sensor.parent_id, Some(device_a.id));

        // wait out the DoS window so the second device's packet is admitted
        tokio::time::sleep(Duration::from_millis(1100)).await;

        processor
            .process(&PiotPacket { device: "B".to_string(), wifi_ssid: None, readings: vec![reading] })
            .await
            .unwrap();
        let device_b = things.find_by_name("B").await.unwrap();
        let sensor = things.find_by_name("TS").await.unwrap();
        assert_eq!(sensor.parent_id, Some(device_b.id));
    }

    #[tokio::test]
    async fn test_idempotent_registration_stable_ids() {
        let (processor, things) = processor().await;
        let packet = PiotPacket {
            device: "device01".to_string(),
            wifi_ssid: None,
            readings: vec![Reading {
                address: "addr1".to_string(),
                temperature: Some(1.0),
                humidity: None,
                pressure: None,
            }],
        };

        processor.process(&packet).await.unwrap();
        let sensor1 = things.find_by_name("Taddr1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        processor.process(&packet).await.unwrap();
        let sensor2 = things.find_by_name("Taddr1").await.unwrap();

        assert_eq!(sensor1.id, sensor2.id);
    }

    #[tokio::test]
    async fn test_unassigned_device_no_publish_but_still_registered() {
        let (processor, things) = processor().await;
        let packet = PiotPacket {
            device: "device01".to_string(),
            wifi_ssid: Some("SSID".to_string()),
            readings: vec![],
        };
        processor.process(&packet).await.unwrap();

        let device = things.find_by_name("device01").await.unwrap();
        assert!(device.org_id.is_none());
    }
}
