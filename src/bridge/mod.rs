//! Bridge module: MQTT dispatcher, HTTP packet processor, and the sinks
//! they fan out to.

mod influxdb;
mod json_path;
mod line_protocol;
mod mqtt;
mod packet;
mod sinks;
mod sql;

pub use influxdb::InfluxSink;
pub use line_protocol::FieldValue;
pub use mqtt::{MqttDispatcher, MqttPublisher};
pub use packet::{router, PacketProcessor, PiotPacket, Reading};
pub use sinks::{InfluxWriter, SqlWriter};
pub use sql::SqlSink;
