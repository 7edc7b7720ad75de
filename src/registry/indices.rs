//! In-process routing indices.
//!
//! Keyed by `(org_id, topic)` so the dispatcher never scans the whole Things
//! collection per message. Rebuilt from the backing store at startup and
//! maintained incrementally by [`super::store::ThingRegistry`] on every
//! mutating call.

use super::thing::{OrgId, Thing, ThingId, ThingType};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Indices {
    by_name: HashMap<String, ThingId>,
    by_piot_id: HashMap<String, ThingId>,
    /// Multiple sensors may share a measurement topic; all must be hit.
    measurement_topic: HashMap<(OrgId, String), Vec<ThingId>>,
    switch_topic: HashMap<(OrgId, String), Vec<ThingId>>,
    telemetry_topic: HashMap<(OrgId, String), ThingId>,
    location_topic: HashMap<(OrgId, String), ThingId>,
    availability_topic: HashMap<(OrgId, String), ThingId>,
}

impl Indices {
    pub fn build(things: &HashMap<ThingId, Thing>) -> Self {
        let mut idx = Self::default();
        for thing in things.values() {
            idx.insert(thing);
        }
        idx
    }

    /// Remove any entries for `id` across every index, used before
    /// re-inserting the updated record.
    pub fn remove(&mut self, thing: &Thing) {
        self.by_name.remove(&thing.name);
        self.by_piot_id.remove(&thing.piot_id);

        if let Some(org_id) = thing.org_id {
            if let Some(sensor) = &thing.sensor
                && let Some(topic) = &sensor.measurement_topic
            {
                remove_from_list(&mut self.measurement_topic, (org_id, topic.clone()), thing.id);
            }
            if let Some(switch) = &thing.switch
                && let Some(topic) = &switch.state_topic
            {
                remove_from_list(&mut self.switch_topic, (org_id, topic.clone()), thing.id);
            }
            if let Some(topic) = &thing.telemetry_topic {
                self.telemetry_topic.remove(&(org_id, topic.clone()));
            }
            if let Some(topic) = &thing.location_topic {
                self.location_topic.remove(&(org_id, topic.clone()));
            }
            if let Some(topic) = &thing.availability_topic {
                self.availability_topic.remove(&(org_id, topic.clone()));
            }
        }
    }

    pub fn insert(&mut self, thing: &Thing) {
        self.by_name.insert(thing.name.clone(), thing.id);
        self.by_piot_id.insert(thing.piot_id.clone(), thing.id);

        let Some(org_id) = thing.org_id else { return };

        if thing.kind == ThingType::Sensor
            && let Some(sensor) = &thing.sensor
            && let Some(topic) = &sensor.measurement_topic
            && !topic.is_empty()
        {
            self.measurement_topic
                .entry((org_id, topic.clone()))
                .or_default()
                .push(thing.id);
        }
        if thing.kind == ThingType::Switch
            && let Some(switch) = &thing.switch
            && let Some(topic) = &switch.state_topic
            && !topic.is_empty()
        {
            self.switch_topic
                .entry((org_id, topic.clone()))
                .or_default()
                .push(thing.id);
        }
        if let Some(topic) = &thing.telemetry_topic
            && !topic.is_empty()
        {
            self.telemetry_topic.insert((org_id, topic.clone()), thing.id);
        }
        if let Some(topic) = &thing.location_topic
            && !topic.is_empty()
        {
            self.location_topic.insert((org_id, topic.clone()), thing.id);
        }
        if let Some(topic) = &thing.availability_topic
            && !topic.is_empty()
        {
            self.availability_topic
                .insert((org_id, topic.clone()), thing.id);
        }
    }

    /// Re-index `thing` after a mutation: drop its stale entries, re-derive
    /// from the current record. `before` is the prior snapshot (if any).
    pub fn reindex(&mut self, before: Option<&Thing>, after: &Thing) {
        if let Some(before) = before {
            self.remove(before);
        }
        self.insert(after);
    }

    pub fn by_name(&self, name: &str) -> Option<ThingId> {
        self.by_name.get(name).copied()
    }

    pub fn by_piot_id(&self, piot_id: &str) -> Option<ThingId> {
        self.by_piot_id.get(piot_id).copied()
    }

    pub fn by_measurement_topic(&self, org_id: OrgId, topic: &str) -> Vec<ThingId> {
        self.measurement_topic
            .get(&(org_id, topic.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_switch_topic(&self, org_id: OrgId, topic: &str) -> Vec<ThingId> {
        self.switch_topic
            .get(&(org_id, topic.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_telemetry_topic(&self, org_id: OrgId, topic: &str) -> Option<ThingId> {
        self.telemetry_topic.get(&(org_id, topic.to_string())).copied()
    }

    pub fn by_location_topic(&self, org_id: OrgId, topic: &str) -> Option<ThingId> {
        self.location_topic.get(&(org_id, topic.to_string())).copied()
    }

    pub fn by_availability_topic(&self, org_id: OrgId, topic: &str) -> Option<ThingId> {
        self.availability_topic
            .get(&(org_id, topic.to_string()))
            .copied()
    }
}

fn remove_from_list(
    map: &mut HashMap<(OrgId, String), Vec<ThingId>>,
    key: (OrgId, String),
    id: ThingId,
) {
    if let Some(list) = map.get_mut(&key) {
        list.retain(|&existing| existing != id);
        if list.is_empty() {
            map.remove(&key);
        }
    }
}
