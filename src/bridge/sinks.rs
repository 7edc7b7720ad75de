//! Sink interfaces.
//!
//! [`InfluxWriter`] and [`SqlWriter`] are the operation sets [`InfluxSink`]
//! and [`SqlSink`] implement against the real stores; tests substitute
//! recording mocks behind the same traits instead of standing up a broker,
//! an HTTP endpoint, and a MySQL server.

use crate::registry::Thing;
use async_trait::async_trait;

/// Time-series sink contract.
#[async_trait]
pub trait InfluxWriter: Send + Sync {
    async fn post_measurement(&self, thing: &Thing, value: &str);
    async fn post_switch_state(&self, thing: &Thing, value: &str);
    async fn post_location(&self, thing: &Thing, lat: f64, lng: f64, sats: Option<i64>, ts_millis: i64);
}

/// Relational sink contract.
#[async_trait]
pub trait SqlWriter: Send + Sync {
    async fn post_measurement(&self, thing: &Thing, value: &str);
}

#[cfg(test)]
pub mod mock {
    //! Recording sink mocks used by dispatcher/processor tests.

    use super::*;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum InfluxCall {
        Measurement { thing_id: i64, value: String },
        SwitchState { thing_id: i64, value: String },
        Location { thing_id: i64, lat: f64, lng: f64, sats: Option<i64>, ts_millis: i64 },
    }

    #[derive(Default)]
    pub struct RecordingInflux {
        pub calls: Mutex<Vec<InfluxCall>>,
    }

    #[async_trait]
    impl InfluxWriter for RecordingInflux {
        async fn post_measurement(&self, thing: &Thing, value: &str) {
            self.calls.lock().await.push(InfluxCall::Measurement {
                thing_id: thing.id.0,
                value: value.to_string(),
            });
        }

        async fn post_switch_state(&self, thing: &Thing, value: &str) {
            self.calls.lock().await.push(InfluxCall::SwitchState {
                thing_id: thing.id.0,
                value: value.to_string(),
            });
        }

        async fn post_location(
            &self,
            thing: &Thing,
            lat: f64,
            lng: f64,
            sats: Option<i64>,
            ts_millis: i64,
        ) {
            self.calls.lock().await.push(InfluxCall::Location {
                thing_id: thing.id.0,
                lat,
                lng,
                sats,
                ts_millis,
            });
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct SqlCall {
        pub thing_id: i64,
        pub value: String,
    }

    #[derive(Default)]
    pub struct RecordingSql {
        pub calls: Mutex<Vec<SqlCall>>,
    }

    #[async_trait]
    impl SqlWriter for RecordingSql {
        async fn post_measurement(&self, thing: &Thing, value: &str) {
            self.calls.lock().await.push(SqlCall {
                thing_id: thing.id.0,
                value: value.to_string(),
            });
        }
    }
}
