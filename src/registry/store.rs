//! Persistent Thing/Org registry backed by SQLite.
//!
//! Every mutating operation writes through to the database first, then
//! updates the in-process cache and routing indices under a
//! short-held write lock — no I/O ever happens while the lock is held.

use super::indices::Indices;
use super::org::Org;
use super::thing::{OrgId, SensorInfo, SwitchInfo, Thing, ThingId, ThingType};
use crate::error::HubError;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

struct Cache {
    things: HashMap<ThingId, Thing>,
    indices: Indices,
}

/// Persistent mapping of thing identity and per-thing configuration.
pub struct ThingRegistry {
    pool: SqlitePool,
    cache: RwLock<Cache>,
}

const CREATE_THINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS things (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    piot_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE,
    alias TEXT,
    type TEXT NOT NULL,
    org_id INTEGER,
    parent_id INTEGER,
    enabled INTEGER NOT NULL,
    created TEXT NOT NULL,
    last_seen_at TEXT,
    availability_topic TEXT,
    availability_yes TEXT,
    availability_no TEXT,
    telemetry_topic TEXT,
    telemetry TEXT,
    location_topic TEXT,
    location_lat_value TEXT,
    location_lng_value TEXT,
    location_sat_value TEXT,
    location_date_value TEXT,
    location_tracking INTEGER NOT NULL DEFAULT 0,
    location_latitude REAL,
    location_longitude REAL,
    location_satellites INTEGER,
    location_ts INTEGER,
    store_influxdb INTEGER NOT NULL DEFAULT 0,
    store_mysqldb INTEGER NOT NULL DEFAULT 0,
    sensor_json TEXT,
    switch_json TEXT
)"#;

impl ThingRegistry {
    /// Connect to the registry DSN, create the schema if absent, and load
    /// every thing into the in-process cache and routing indices.
    pub async fn connect(dsn: &str) -> Result<Self, HubError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(dsn)
            .await?;
        sqlx::query(CREATE_THINGS_TABLE).execute(&pool).await?;

        let things = load_all_things(&pool).await?;
        let indices = Indices::build(&things);

        Ok(Self {
            pool,
            cache: RwLock::new(Cache { things, indices }),
        })
    }

    pub async fn get(&self, id: ThingId) -> Result<Thing, HubError> {
        self.cache
            .read()
            .await
            .things
            .get(&id)
            .cloned()
            .ok_or(HubError::NotFound)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Thing, HubError> {
        let cache = self.cache.read().await;
        let id = cache.indices.by_name(name).ok_or(HubError::NotFound)?;
        cache.things.get(&id).cloned().ok_or(HubError::NotFound)
    }

    pub async fn find_by_piot_id(&self, piot_id: &str) -> Result<Thing, HubError> {
        let cache = self.cache.read().await;
        let id = cache.indices.by_piot_id(piot_id).ok_or(HubError::NotFound)?;
        cache.things.get(&id).cloned().ok_or(HubError::NotFound)
    }

    /// Idempotent create-or-fetch.
    pub async fn register_piot(&self, piot_id: &str, kind: ThingType) -> Result<Thing, HubError> {
        if let Ok(existing) = self.find_by_piot_id(piot_id).await {
            return Ok(existing);
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO things (piot_id, name, type, enabled, created, location_tracking, store_influxdb, store_mysqldb)
             VALUES (?, ?, ?, 1, ?, 0, 0, 0)",
        )
        .bind(piot_id)
        .bind(piot_id)
        .bind(kind.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await;

        let thing = match result {
            Ok(res) => Thing {
                id: ThingId(res.last_insert_rowid()),
                piot_id: piot_id.to_string(),
                name: piot_id.to_string(),
                alias: None,
                kind,
                org_id: None,
                parent_id: None,
                enabled: true,
                created: now,
                last_seen_at: None,
                availability_topic: None,
                availability_yes: None,
                availability_no: None,
                telemetry_topic: None,
                telemetry: None,
                location_topic: None,
                location_lat_value: None,
                location_lng_value: None,
                location_sat_value: None,
                location_date_value: None,
                location_tracking: false,
                location_latitude: None,
                location_longitude: None,
                location_satellites: None,
                location_ts: None,
                store_influxdb: false,
                store_mysqldb: false,
                sensor: None,
                switch: None,
            },
            // Lost the race against a concurrent register_piot for the same
            // piot_id: the other caller's insert won, fetch what it wrote.
            Err(sqlx::Error::Database(dbe)) if dbe.is_unique_violation() => {
                return self.find_by_piot_id(piot_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        let mut cache = self.cache.write().await;
        cache.indices.reindex(None, &thing);
        cache.things.insert(thing.id, thing.clone());
        debug!(thing = %thing.name, "registered new thing");
        Ok(thing)
    }

    pub async fn set_parent(&self, child_id: ThingId, parent_id: ThingId) -> Result<Thing, HubError> {
        self.mutate(child_id, |t| t.parent_id = Some(parent_id)).await
    }

    pub async fn touch(&self, id: ThingId) -> Result<Thing, HubError> {
        let now = Utc::now();
        self.mutate(id, move |t| t.last_seen_at = Some(now)).await
    }

    pub async fn set_availability_topic(&self, id: ThingId, topic: &str) -> Result<Thing, HubError> {
        let topic = topic.to_string();
        self.mutate(id, move |t| t.availability_topic = Some(topic)).await
    }

    pub async fn set_availability_yes_no(
        &self,
        id: ThingId,
        yes: &str,
        no: &str,
    ) -> Result<Thing, HubError> {
        let (yes, no) = (yes.to_string(), no.to_string());
        self.mutate(id, move |t| {
            t.availability_yes = Some(yes);
            t.availability_no = Some(no);
        })
        .await
    }

    pub async fn set_sensor_measurement_topic(
        &self,
        id: ThingId,
        topic: &str,
    ) -> Result<Thing, HubError> {
        let topic = topic.to_string();
        self.mutate(id, move |t| {
            t.sensor.get_or_insert_with(SensorInfo::default).measurement_topic = Some(topic);
        })
        .await
    }

    pub async fn set_sensor_class(&self, id: ThingId, class: &str) -> Result<Thing, HubError> {
        let class = class.to_string();
        self.mutate(id, move |t| {
            t.sensor.get_or_insert_with(SensorInfo::default).class = Some(class);
        })
        .await
    }

    /// Store the latest telemetry payload.
    pub async fn set_telemetry(&self, id: ThingId, value: &str) -> Result<Thing, HubError> {
        let value = value.to_string();
        self.mutate(id, move |t| t.telemetry = Some(value)).await
    }

    pub async fn set_location_topic(&self, id: ThingId, topic: &str) -> Result<Thing, HubError> {
        let topic = topic.to_string();
        self.mutate(id, move |t| t.location_topic = Some(topic)).await
    }

    pub async fn set_location_values(
        &self,
        id: ThingId,
        lat_key: &str,
        lng_key: &str,
        sat_key: &str,
        date_key: &str,
    ) -> Result<Thing, HubError> {
        let (lat_key, lng_key, sat_key, date_key) = (
            lat_key.to_string(),
            lng_key.to_string(),
            sat_key.to_string(),
            date_key.to_string(),
        );
        self.mutate(id, move |t| {
            t.location_lat_value = Some(lat_key);
            t.location_lng_value = Some(lng_key);
            t.location_sat_value = Some(sat_key);
            t.location_date_value = Some(date_key);
        })
        .await
    }

    pub async fn set_location(
        &self,
        id: ThingId,
        lat: f64,
        lng: f64,
        sats: Option<i64>,
        ts: i64,
    ) -> Result<Thing, HubError> {
        self.mutate(id, move |t| {
            t.location_latitude = Some(lat);
            t.location_longitude = Some(lng);
            t.location_satellites = sats;
            t.location_ts = Some(ts);
        })
        .await
    }

    /// Every sensor sharing `topic` in `org_id` is returned.
    pub async fn find_by_measurement_topic(&self, org_id: OrgId, topic: &str) -> Vec<Thing> {
        let cache = self.cache.read().await;
        cache
            .indices
            .by_measurement_topic(org_id, topic)
            .into_iter()
            .filter_map(|id| cache.things.get(&id).cloned())
            .collect()
    }

    pub async fn find_by_switch_topic(&self, org_id: OrgId, topic: &str) -> Vec<Thing> {
        let cache = self.cache.read().await;
        cache
            .indices
            .by_switch_topic(org_id, topic)
            .into_iter()
            .filter_map(|id| cache.things.get(&id).cloned())
            .collect()
    }

    pub async fn find_by_telemetry_topic(&self, org_id: OrgId, topic: &str) -> Result<Thing, HubError> {
        let cache = self.cache.read().await;
        let id = cache
            .indices
            .by_telemetry_topic(org_id, topic)
            .ok_or(HubError::NotFound)?;
        cache.things.get(&id).cloned().ok_or(HubError::NotFound)
    }

    pub async fn find_by_location_topic(&self, org_id: OrgId, topic: &str) -> Result<Thing, HubError> {
        let cache = self.cache.read().await;
        let id = cache
            .indices
            .by_location_topic(org_id, topic)
            .ok_or(HubError::NotFound)?;
        cache.things.get(&id).cloned().ok_or(HubError::NotFound)
    }

    pub async fn find_by_availability_topic(
        &self,
        org_id: OrgId,
        topic: &str,
    ) -> Result<Thing, HubError> {
        let cache = self.cache.read().await;
        let id = cache
            .indices
            .by_availability_topic(org_id, topic)
            .ok_or(HubError::NotFound)?;
        cache.things.get(&id).cloned().ok_or(HubError::NotFound)
    }

    /// Read-modify-write a thing: persist the full row, then reindex the
    /// cache. Used by every single-field setter above.
    async fn mutate<F>(&self, id: ThingId, f: F) -> Result<Thing, HubError>
    where
        F: FnOnce(&mut Thing),
    {
        let before = self.get(id).await?;
        let mut after = before.clone();
        f(&mut after);

        persist_thing(&self.pool, &after).await?;

        let mut cache = self.cache.write().await;
        cache.indices.reindex(Some(&before), &after);
        cache.things.insert(id, after.clone());
        Ok(after)
    }

    /// Test/bootstrap helper mirroring `register_piot` but allowing full
    /// control over fields in one shot (org assignment, sensor/switch
    /// sub-records). There is no separate admin API, so this exists to
    /// seed things directly in tests and bootstrapping.
    pub async fn insert_thing(&self, mut thing: Thing) -> Result<Thing, HubError> {
        let res = sqlx::query(
            "INSERT INTO things (
                piot_id, name, alias, type, org_id, parent_id, enabled, created, last_seen_at,
                availability_topic, availability_yes, availability_no,
                telemetry_topic, telemetry,
                location_topic, location_lat_value, location_lng_value, location_sat_value, location_date_value,
                location_tracking, location_latitude, location_longitude, location_satellites, location_ts,
                store_influxdb, store_mysqldb, sensor_json, switch_json
            ) VALUES (?,?,?,?,?,?,?,?,?, ?,?,?, ?,?, ?,?,?,?,?, ?,?,?,?,?, ?,?,?,?)",
        )
        .bind(&thing.piot_id)
        .bind(&thing.name)
        .bind(&thing.alias)
        .bind(thing.kind.as_str())
        .bind(thing.org_id.map(|o| o.0))
        .bind(thing.parent_id.map(|p| p.0))
        .bind(thing.enabled)
        .bind(thing.created.to_rfc3339())
        .bind(thing.last_seen_at.map(|t| t.to_rfc3339()))
        .bind(&thing.availability_topic)
        .bind(&thing.availability_yes)
        .bind(&thing.availability_no)
        .bind(&thing.telemetry_topic)
        .bind(&thing.telemetry)
        .bind(&thing.location_topic)
        .bind(&thing.location_lat_value)
        .bind(&thing.location_lng_value)
        .bind(&thing.location_sat_value)
        .bind(&thing.location_date_value)
        .bind(thing.location_tracking)
        .bind(thing.location_latitude)
        .bind(thing.location_longitude)
        .bind(thing.location_satellites)
        .bind(thing.location_ts)
        .bind(thing.store_influxdb)
        .bind(thing.store_mysqldb)
        .bind(thing.sensor.as_ref().map(|s| serde_json::to_string(s).unwrap()))
        .bind(thing.switch.as_ref().map(|s| serde_json::to_string(s).unwrap()))
        .execute(&self.pool)
        .await?;

        thing.id = ThingId(res.last_insert_rowid());

        let mut cache = self.cache.write().await;
        cache.indices.reindex(None, &thing);
        cache.things.insert(thing.id, thing.clone());
        Ok(thing)
    }

    /// Assign a thing to an org, exposed for bootstrapping/tests the same
    /// way [`Self::insert_thing`] is.
    pub async fn assign_org(&self, id: ThingId, org_id: OrgId) -> Result<Thing, HubError> {
        self.mutate(id, move |t| t.org_id = Some(org_id)).await
    }
}

async fn persist_thing(pool: &SqlitePool, thing: &Thing) -> Result<(), HubError> {
    sqlx::query(
        "UPDATE things SET
            alias = ?, type = ?, org_id = ?, parent_id = ?, enabled = ?, last_seen_at = ?,
            availability_topic = ?, availability_yes = ?, availability_no = ?,
            telemetry_topic = ?, telemetry = ?,
            location_topic = ?, location_lat_value = ?, location_lng_value = ?, location_sat_value = ?, location_date_value = ?,
            location_tracking = ?, location_latitude = ?, location_longitude = ?, location_satellites = ?, location_ts = ?,
            store_influxdb = ?, store_mysqldb = ?, sensor_json = ?, switch_json = ?
        WHERE id = ?",
    )
    .bind(&thing.alias)
    .bind(thing.kind.as_str())
    .bind(thing.org_id.map(|o| o.0))
    .bind(thing.parent_id.map(|p| p.0))
    .bind(thing.enabled)
    .bind(thing.last_seen_at.map(|t| t.to_rfc3339()))
    .bind(&thing.availability_topic)
    .bind(&thing.availability_yes)
    .bind(&thing.availability_no)
    .bind(&thing.telemetry_topic)
    .bind(&thing.telemetry)
    .bind(&thing.location_topic)
    .bind(&thing.location_lat_value)
    .bind(&thing.location_lng_value)
    .bind(&thing.location_sat_value)
    .bind(&thing.location_date_value)
    .bind(thing.location_tracking)
    .bind(thing.location_latitude)
    .bind(thing.location_longitude)
    .bind(thing.location_satellites)
    .bind(thing.location_ts)
    .bind(thing.store_influxdb)
    .bind(thing.store_mysqldb)
    .bind(thing.sensor.as_ref().map(|s| serde_json::to_string(s).unwrap()))
    .bind(thing.switch.as_ref().map(|s| serde_json::to_string(s).unwrap()))
    .bind(thing.id.0)
    .execute(pool)
    .await?;
    Ok(())
}

async fn load_all_things(pool: &SqlitePool) -> Result<HashMap<ThingId, Thing>, HubError> {
    let rows = sqlx::query("SELECT * FROM things").fetch_all(pool).await?;
    let mut things = HashMap::with_capacity(rows.len());
    for row in rows {
        let thing = row_to_thing(&row)?;
        things.insert(thing.id, thing);
    }
    Ok(things)
}

fn row_to_thing(row: &sqlx::sqlite::SqliteRow) -> Result<Thing, HubError> {
    let sensor_json: Option<String> = row.try_get("sensor_json")?;
    let switch_json: Option<String> = row.try_get("switch_json")?;
    let created: String = row.try_get("created")?;
    let last_seen_at: Option<String> = row.try_get("last_seen_at")?;
    let kind: String = row.try_get("type")?;

    Ok(Thing {
        id: ThingId(row.try_get("id")?),
        piot_id: row.try_get("piot_id")?,
        name: row.try_get("name")?,
        alias: row.try_get("alias")?,
        kind: kind.parse()?,
        org_id: row.try_get::<Option<i64>, _>("org_id")?.map(OrgId),
        parent_id: row.try_get::<Option<i64>, _>("parent_id")?.map(ThingId),
        enabled: row.try_get("enabled")?,
        created: parse_datetime(&created)?,
        last_seen_at: last_seen_at.map(|s| parse_datetime(&s)).transpose()?,
        availability_topic: row.try_get("availability_topic")?,
        availability_yes: row.try_get("availability_yes")?,
        availability_no: row.try_get("availability_no")?,
        telemetry_topic: row.try_get("telemetry_topic")?,
        telemetry: row.try_get("telemetry")?,
        location_topic: row.try_get("location_topic")?,
        location_lat_value: row.try_get("location_lat_value")?,
        location_lng_value: row.try_get("location_lng_value")?,
        location_sat_value: row.try_get("location_sat_value")?,
        location_date_value: row.try_get("location_date_value")?,
        location_tracking: row.try_get("location_tracking")?,
        location_latitude: row.try_get("location_latitude")?,
        location_longitude: row.try_get("location_longitude")?,
        location_satellites: row.try_get("location_satellites")?,
        location_ts: row.try_get("location_ts")?,
        store_influxdb: row.try_get("store_influxdb")?,
        store_mysqldb: row.try_get("store_mysqldb")?,
        sensor: sensor_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| HubError::Internal(e.to_string()))?,
        switch: switch_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| HubError::Internal(e.to_string()))?,
    })
}

fn parse_datetime(s: &str) -> Result<chrono::DateTime<Utc>, HubError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HubError::Internal(format!("bad timestamp '{s}': {e}")))
}

const CREATE_ORGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orgs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    influxdb TEXT NOT NULL,
    influxdb_username TEXT NOT NULL,
    influxdb_password TEXT NOT NULL,
    mysqldb TEXT NOT NULL,
    mysqldb_username TEXT NOT NULL,
    mysqldb_password TEXT NOT NULL
)"#;

/// Persistent mapping of org identity to per-org sink credentials.
pub struct OrgRegistry {
    pool: SqlitePool,
    cache: RwLock<HashMap<OrgId, Org>>,
}

impl OrgRegistry {
    pub async fn connect(pool: SqlitePool) -> Result<Self, HubError> {
        sqlx::query(CREATE_ORGS_TABLE).execute(&pool).await?;
        let rows = sqlx::query("SELECT * FROM orgs").fetch_all(&pool).await?;
        let mut cache = HashMap::with_capacity(rows.len());
        for row in rows {
            let org = row_to_org(&row)?;
            cache.insert(org.id, org);
        }
        Ok(Self {
            pool,
            cache: RwLock::new(cache),
        })
    }

    pub async fn get(&self, id: OrgId) -> Result<Org, HubError> {
        self.cache.read().await.get(&id).cloned().ok_or(HubError::NotFound)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Org, HubError> {
        self.cache
            .read()
            .await
            .values()
            .find(|o| o.name == name)
            .cloned()
            .ok_or(HubError::NotFound)
    }

    /// Exposed for bootstrapping/tests; there is no separate admin API.
    pub async fn create(&self, mut org: Org) -> Result<Org, HubError> {
        let res = sqlx::query(
            "INSERT INTO orgs (name, influxdb, influxdb_username, influxdb_password, mysqldb, mysqldb_username, mysqldb_password)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&org.name)
        .bind(&org.influxdb)
        .bind(&org.influxdb_username)
        .bind(&org.influxdb_password)
        .bind(&org.mysqldb)
        .bind(&org.mysqldb_username)
        .bind(&org.mysqldb_password)
        .execute(&self.pool)
        .await?;

        org.id = OrgId(res.last_insert_rowid());
        self.cache.write().await.insert(org.id, org.clone());
        Ok(org)
    }
}

fn row_to_org(row: &sqlx::sqlite::SqliteRow) -> Result<Org, HubError> {
    Ok(Org {
        id: OrgId(row.try_get("id")?),
        name: row.try_get("name")?,
        influxdb: row.try_get("influxdb")?,
        influxdb_username: row.try_get("influxdb_username")?,
        influxdb_password: row.try_get("influxdb_password")?,
        mysqldb: row.try_get("mysqldb")?,
        mysqldb_username: row.try_get("mysqldb_username")?,
        mysqldb_password: row.try_get("mysqldb_password")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> ThingRegistry {
        ThingRegistry::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_register_piot_is_idempotent() {
        let reg = registry().await;
        let t1 = reg.register_piot("device01", ThingType::Device).await.unwrap();
        let t2 = reg.register_piot("device01", ThingType::Device).await.unwrap();
        assert_eq!(t1.id, t2.id);
        assert_eq!(t1.name, "device01");
        assert!(t1.org_id.is_none());
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let reg = registry().await;
        assert!(matches!(reg.get(ThingId(999)).await, Err(HubError::NotFound)));
    }

    #[tokio::test]
    async fn test_find_by_name_unknown_is_not_found() {
        let reg = registry().await;
        assert!(matches!(
            reg.find_by_name("nope").await,
            Err(HubError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_set_parent() {
        let reg = registry().await;
        let parent = reg.register_piot("parent", ThingType::Device).await.unwrap();
        let child = reg.register_piot("child", ThingType::Sensor).await.unwrap();
        let updated = reg.set_parent(child.id, parent.id).await.unwrap();
        assert_eq!(updated.parent_id, Some(parent.id));
    }

    #[tokio::test]
    async fn test_touch_sets_last_seen() {
        let reg = registry().await;
        let thing = reg.register_piot("thing1", ThingType::Device).await.unwrap();
        assert!(thing.last_seen_at.is_none());
        let touched = reg.touch(thing.id).await.unwrap();
        assert!(touched.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn test_find_by_measurement_topic_multiple_sensors() {
        let reg = registry().await;
        let org = OrgId(1);
        let s1 = reg.register_piot("s1", ThingType::Sensor).await.unwrap();
        let s1 = reg.assign_org(s1.id, org).await.unwrap();
        let s1 = reg.set_sensor_measurement_topic(s1.id, "xyz/value").await.unwrap();
        let s2 = reg.register_piot("s2", ThingType::Sensor).await.unwrap();
        let s2 = reg.assign_org(s2.id, org).await.unwrap();
        let s2 = reg.set_sensor_measurement_topic(s2.id, "xyz/value").await.unwrap();

        let matches = reg.find_by_measurement_topic(org, "xyz/value").await;
        assert_eq!(matches.len(), 2);
        let ids: Vec<_> = matches.iter().map(|t| t.id).collect();
        assert!(ids.contains(&s1.id));
        assert!(ids.contains(&s2.id));
    }

    #[tokio::test]
    async fn test_unassigned_thing_not_indexed_by_topic() {
        let reg = registry().await;
        let s1 = reg.register_piot("s1", ThingType::Sensor).await.unwrap();
        reg.set_sensor_measurement_topic(s1.id, "xyz/value").await.unwrap();

        // no org assigned: must not show up in topic routing (I3)
        let matches = reg.find_by_measurement_topic(OrgId(1), "xyz/value").await;
        assert!(matches.is_empty());
    }
}
