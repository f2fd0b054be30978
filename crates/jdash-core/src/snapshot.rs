use crate::delta::{
    ApplicationChange, ActionChange, ChangeKind, CharmChange, Delta, EntityDelta, MachineChange,
    ModelChange, RelationChange, Status, UnitChange,
};
use crate::status::{DetailedStatus, FullStatus, UnitStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Annotations = BTreeMap<String, String>;

/// Normalized state of one watched model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelSnapshot {
    #[serde(default)]
    pub actions: BTreeMap<String, ActionChange>,
    #[serde(default)]
    pub annotations: BTreeMap<String, Annotations>,
    /// An entry may hold only a `unit-count` when unit deltas arrive before
    /// the application delta.
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationChange>,
    #[serde(default)]
    pub charms: BTreeMap<String, CharmChange>,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineChange>,
    #[serde(default)]
    pub model: ModelChange,
    #[serde(default)]
    pub relations: BTreeMap<String, RelationChange>,
    #[serde(default)]
    pub units: BTreeMap<String, UnitChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    ModelRemoved,
}

impl ModelSnapshot {
    pub fn empty(model_uuid: &str) -> Self {
        Self {
            model: ModelChange {
                model_uuid: model_uuid.to_string(),
                ..ModelChange::default()
            },
            ..Self::default()
        }
    }

    /// Build the starting snapshot from one full status fetch. The watch
    /// feed is a continuation, so entities that never change after the
    /// subscription starts would otherwise be missing.
    pub fn seed(model_uuid: &str, status: &FullStatus) -> Self {
        let mut snapshot = Self::empty(model_uuid);
        let info = &status.model;
        snapshot.model.name = non_empty(&info.name);
        snapshot.model.model_type = non_empty(&info.model_type);
        snapshot.model.cloud_tag = non_empty(&info.cloud_tag);
        snapshot.model.region = info.region.clone();
        snapshot.model.version = non_empty(&info.version);
        snapshot.model.status = Some(from_detailed(&info.model_status));

        for (name, app) in &status.applications {
            snapshot.applications.insert(
                name.clone(),
                ApplicationChange {
                    model_uuid: model_uuid.to_string(),
                    name: name.clone(),
                    charm_url: app.charm.clone(),
                    exposed: app.exposed,
                    life: app.life.clone(),
                    status: Some(from_detailed(&app.status)),
                    subordinate: !app.subordinate_to.is_empty(),
                    workload_version: app.workload_version.clone(),
                    unit_count: None,
                    ..ApplicationChange::default()
                },
            );
            for (unit_name, unit) in &app.units {
                snapshot.seed_unit(model_uuid, name, unit_name, unit, "");
            }
        }

        for (id, machine) in &status.machines {
            let id = if machine.id.is_empty() {
                id.clone()
            } else {
                machine.id.clone()
            };
            snapshot.machines.insert(
                id.clone(),
                MachineChange {
                    model_uuid: model_uuid.to_string(),
                    id,
                    addresses: machine
                        .ip_addresses
                        .iter()
                        .map(|address| Value::String(address.clone()))
                        .collect(),
                    agent_status: from_detailed(&machine.agent_status),
                    instance_status: from_detailed(&machine.instance_status),
                    instance_id: machine.instance_id.clone(),
                    series: machine.series.clone(),
                    ..MachineChange::default()
                },
            );
        }

        for relation in &status.relations {
            snapshot.relations.insert(
                relation.key.clone(),
                RelationChange {
                    model_uuid: model_uuid.to_string(),
                    key: relation.key.clone(),
                    id: relation.id,
                    endpoints: relation.endpoints.clone(),
                    ..RelationChange::default()
                },
            );
        }

        let applications: Vec<String> = snapshot.applications.keys().cloned().collect();
        for application in applications {
            snapshot.refresh_unit_count(&application);
        }
        snapshot
    }

    fn seed_unit(
        &mut self,
        model_uuid: &str,
        application: &str,
        unit_name: &str,
        unit: &UnitStatus,
        principal: &str,
    ) {
        let unit_application = unit_name
            .split_once('/')
            .map(|(app, _)| app)
            .unwrap_or(application);
        self.units.insert(
            unit_name.to_string(),
            UnitChange {
                model_uuid: model_uuid.to_string(),
                name: unit_name.to_string(),
                application: unit_application.to_string(),
                charm_url: unit.charm.clone(),
                machine_id: unit.machine.clone(),
                public_address: unit.public_address.clone(),
                principal: principal.to_string(),
                subordinate: !principal.is_empty(),
                agent_status: from_detailed(&unit.agent_status),
                workload_status: from_detailed(&unit.workload_status),
                ..UnitChange::default()
            },
        );
        for (sub_name, sub) in &unit.subordinates {
            self.seed_unit(model_uuid, application, sub_name, sub, unit_name);
        }
    }

    /// Apply one delta in place.
    pub fn apply_delta(&mut self, delta: &Delta) -> ApplyOutcome {
        let remove = delta.change == ChangeKind::Remove;
        match &delta.entity {
            EntityDelta::Action(change) => {
                upsert_or_remove(&mut self.actions, &change.id, change, remove)
            }
            EntityDelta::Annotation(change) => {
                let entity = change.entity_name().to_string();
                if remove {
                    self.annotations.remove(&entity);
                } else {
                    self.merge_annotations(&entity, &change.annotations);
                }
            }
            EntityDelta::Application(change) => {
                if remove {
                    self.applications.remove(&change.name);
                } else {
                    let unit_count = self
                        .applications
                        .get(&change.name)
                        .and_then(|existing| existing.unit_count);
                    let mut next = change.clone();
                    next.unit_count = unit_count;
                    self.applications.insert(change.name.clone(), next);
                }
            }
            EntityDelta::Charm(change) => {
                upsert_or_remove(&mut self.charms, &change.charm_url, change, remove)
            }
            EntityDelta::Machine(change) => {
                upsert_or_remove(&mut self.machines, &change.id, change, remove)
            }
            EntityDelta::Model(change) => {
                if remove {
                    return ApplyOutcome::ModelRemoved;
                }
                self.model.merge_from(change);
            }
            EntityDelta::Relation(change) => {
                upsert_or_remove(&mut self.relations, &change.key, change, remove)
            }
            EntityDelta::Unit(change) => {
                let previous_application = self
                    .units
                    .get(&change.name)
                    .map(|unit| unit.application.clone());
                upsert_or_remove(&mut self.units, &change.name, change, remove);
                if let Some(previous) = previous_application {
                    if previous != change.application {
                        self.refresh_unit_count(&previous);
                    }
                }
                self.refresh_unit_count(&change.application);
            }
        }
        ApplyOutcome::Applied
    }

    /// Merge annotation values into the entity's map. An empty value unsets
    /// the key and an entity left with no keys is dropped.
    pub fn merge_annotations(&mut self, entity: &str, incoming: &Annotations) {
        let mut merged = self.annotations.remove(entity).unwrap_or_default();
        for (key, value) in incoming {
            if value.is_empty() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
        if !merged.is_empty() {
            self.annotations.insert(entity.to_string(), merged);
        }
    }

    /// A stub entry that never saw an application delta is dropped once its
    /// last unit goes.
    fn refresh_unit_count(&mut self, application: &str) {
        if application.is_empty() {
            return;
        }
        let count = self
            .units
            .values()
            .filter(|unit| unit.application == application)
            .count() as u32;
        let stub_only = count == 0
            && self.applications.get(application).is_some_and(|entry| {
                entry
                    .unit_count
                    .is_some_and(|previous| *entry == self.unit_count_stub(application, previous))
            });
        if stub_only {
            self.applications.remove(application);
            return;
        }
        match self.applications.get_mut(application) {
            Some(entry) => entry.unit_count = Some(count),
            None if count > 0 => {
                let stub = self.unit_count_stub(application, count);
                self.applications.insert(application.to_string(), stub);
            }
            None => {}
        }
    }

    fn unit_count_stub(&self, application: &str, count: u32) -> ApplicationChange {
        ApplicationChange {
            model_uuid: self.model.model_uuid.clone(),
            name: application.to_string(),
            unit_count: Some(count),
            ..ApplicationChange::default()
        }
    }
}

/// Apply a batch in arrival order. Returns `None` once the model itself is
/// removed; later deltas in the batch are then meaningless.
pub fn apply_deltas(mut snapshot: ModelSnapshot, deltas: &[Delta]) -> Option<ModelSnapshot> {
    for delta in deltas {
        if snapshot.apply_delta(delta) == ApplyOutcome::ModelRemoved {
            return None;
        }
    }
    Some(snapshot)
}

fn upsert_or_remove<T: Clone>(map: &mut BTreeMap<String, T>, key: &str, value: &T, remove: bool) {
    if remove {
        map.remove(key);
    } else {
        map.insert(key.to_string(), value.clone());
    }
}

fn from_detailed(status: &DetailedStatus) -> Status {
    Status {
        current: status.status.clone(),
        message: status.info.clone(),
        since: status.since.clone(),
        version: status.version.clone(),
        extra: BTreeMap::new(),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{parse_deltas, AnnotationChange};
    use serde_json::json;

    fn unit(name: &str, extra: Value) -> UnitChange {
        let mut payload = json!({"model-uuid": "abc123", "name": name, "application": "etcd"});
        if let (Some(target), Some(source)) = (payload.as_object_mut(), extra.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(payload).expect("unit payload")
    }

    fn annotation(tag: &str, values: &[(&str, &str)]) -> Delta {
        Delta::change(EntityDelta::Annotation(AnnotationChange {
            model_uuid: "abc123".to_string(),
            tag: tag.to_string(),
            annotations: values
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }))
    }

    #[test]
    fn change_then_remove_leaves_key_absent() {
        let change = Delta::change(EntityDelta::Unit(unit("etcd/0", json!({"x": 1}))));
        let remove = Delta::remove(EntityDelta::Unit(unit("etcd/0", json!({}))));

        let forward = apply_deltas(ModelSnapshot::empty("abc123"), &[change.clone(), remove.clone()])
            .expect("snapshot");
        assert!(!forward.units.contains_key("etcd/0"));

        let reversed = apply_deltas(ModelSnapshot::empty("abc123"), &[remove, change])
            .expect("snapshot");
        let stored = reversed.units.get("etcd/0").expect("unit present");
        assert_eq!(stored.extra.get("x"), Some(&json!(1)));
    }

    #[test]
    fn annotations_merge_into_existing_map() {
        let mut snapshot = ModelSnapshot::empty("abc123");
        snapshot
            .annotations
            .insert("etcd".to_string(), [("a", "1"), ("b", "2")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect());

        let merged = apply_deltas(
            snapshot,
            &[annotation("application-etcd", &[("b", "3"), ("c", "4")])],
        )
        .expect("snapshot");
        let values = merged.annotations.get("etcd").expect("etcd annotations");
        assert_eq!(values.get("a").map(String::as_str), Some("1"));
        assert_eq!(values.get("b").map(String::as_str), Some("3"));
        assert_eq!(values.get("c").map(String::as_str), Some("4"));

        let emptied = apply_deltas(
            merged,
            &[annotation("application-etcd", &[("a", ""), ("b", ""), ("c", "")])],
        )
        .expect("snapshot");
        assert!(!emptied.annotations.contains_key("etcd"));
    }

    #[test]
    fn applying_the_same_change_twice_is_idempotent() {
        let delta = Delta::change(EntityDelta::Unit(unit(
            "etcd/0",
            json!({"workload-status": {"current": "active", "message": "", "version": ""}}),
        )));
        let once = apply_deltas(ModelSnapshot::empty("abc123"), &[delta.clone()]).expect("once");
        let twice =
            apply_deltas(ModelSnapshot::empty("abc123"), &[delta.clone(), delta]).expect("twice");
        assert_eq!(once, twice);
    }

    #[test]
    fn unit_count_tracks_units_before_and_after_application_delta() {
        let batch = json!([
            ["unit", "change", {"model-uuid": "abc123", "name": "etcd/0", "application": "etcd"}],
            ["unit", "change", {"model-uuid": "abc123", "name": "etcd/1", "application": "etcd"}],
            ["application", "change", {"model-uuid": "abc123", "name": "etcd", "charm-url": "ch:etcd-3"}],
            ["unit", "remove", {"model-uuid": "abc123", "name": "etcd/0", "application": "etcd"}]
        ]);
        let deltas = parse_deltas(&batch).expect("parse");
        let snapshot = apply_deltas(ModelSnapshot::empty("abc123"), &deltas).expect("snapshot");
        let app = snapshot.applications.get("etcd").expect("etcd");
        assert_eq!(app.charm_url, "ch:etcd-3");
        assert_eq!(app.unit_count, Some(1));
    }

    #[test]
    fn unit_only_applications_vanish_with_their_last_unit() {
        let batch = json!([
            ["unit", "change", {"model-uuid": "abc123", "name": "etcd/0", "application": "etcd"}],
            ["unit", "change", {"model-uuid": "abc123", "name": "redis/0", "application": "redis"}],
            ["application", "change", {"model-uuid": "abc123", "name": "redis", "charm-url": "ch:redis-1"}],
            ["unit", "remove", {"model-uuid": "abc123", "name": "etcd/0", "application": "etcd"}],
            ["unit", "remove", {"model-uuid": "abc123", "name": "redis/0", "application": "redis"}]
        ]);
        let deltas = parse_deltas(&batch).expect("parse");
        let snapshot = apply_deltas(ModelSnapshot::empty("abc123"), &deltas).expect("snapshot");
        assert!(!snapshot.applications.contains_key("etcd"));
        let redis = snapshot.applications.get("redis").expect("redis");
        assert_eq!(redis.unit_count, Some(0));
    }

    #[test]
    fn model_change_keeps_seeded_fields() {
        let status: FullStatus = serde_json::from_value(json!({
            "model": {"name": "default", "type": "iaas", "cloud-tag": "cloud-aws", "region": "eu-west-1", "version": "3.1.6"},
            "applications": {
                "etcd": {"charm": "ch:etcd-3", "units": {"etcd/0": {"machine": "0", "subordinates": {"nrpe/0": {}}}}}
            },
            "machines": {"0": {"id": "0", "instance-id": "i-1"}},
            "relations": [{"id": 1, "key": "etcd:cluster"}]
        }))
        .expect("status");
        let snapshot = ModelSnapshot::seed("abc123", &status);
        assert_eq!(snapshot.units.len(), 2);
        assert_eq!(
            snapshot.units.get("nrpe/0").map(|unit| unit.principal.as_str()),
            Some("etcd/0")
        );
        assert_eq!(
            snapshot.applications.get("etcd").and_then(|app| app.unit_count),
            Some(1)
        );
        assert!(snapshot.relations.contains_key("etcd:cluster"));

        let delta = parse_deltas(&json!([
            ["model", "change", {"model-uuid": "abc123", "name": "renamed", "life": "alive"}]
        ]))
        .expect("parse");
        let updated = apply_deltas(snapshot, &delta).expect("snapshot");
        assert_eq!(updated.model.name.as_deref(), Some("renamed"));
        assert_eq!(updated.model.cloud_tag.as_deref(), Some("cloud-aws"));
        assert_eq!(updated.model.region.as_deref(), Some("eu-west-1"));
        assert_eq!(updated.model.model_type.as_deref(), Some("iaas"));
    }

    #[test]
    fn model_remove_drops_snapshot() {
        let deltas = parse_deltas(&json!([
            ["model", "remove", {"model-uuid": "abc123"}],
            ["unit", "change", {"model-uuid": "abc123", "name": "etcd/0"}]
        ]))
        .expect("parse");
        assert!(apply_deltas(ModelSnapshot::empty("abc123"), &deltas).is_none());
    }
}
