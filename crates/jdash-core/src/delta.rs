use serde::de::{self, Deserializer};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Action,
    Annotation,
    Application,
    Charm,
    Machine,
    Model,
    Relation,
    Unit,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Action,
        EntityKind::Annotation,
        EntityKind::Application,
        EntityKind::Charm,
        EntityKind::Machine,
        EntityKind::Model,
        EntityKind::Relation,
        EntityKind::Unit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Action => "action",
            EntityKind::Annotation => "annotation",
            EntityKind::Application => "application",
            EntityKind::Charm => "charm",
            EntityKind::Machine => "machine",
            EntityKind::Model => "model",
            EntityKind::Relation => "relation",
            EntityKind::Unit => "unit",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == input)
            .ok_or_else(|| format!("unknown entity kind: {input}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Change,
    Remove,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Change => "change",
            ChangeKind::Remove => "remove",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "change" => Ok(ChangeKind::Change),
            "remove" => Ok(ChangeKind::Remove),
            other => Err(format!("unknown change kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Status {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub enqueued: Option<String>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    pub tag: String,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub annotations: BTreeMap<String, String>,
}

impl AnnotationChange {
    /// Annotations are stored under the entity name, so `application-etcd`
    /// lands under `etcd`.
    pub fn entity_name(&self) -> &str {
        self.tag
            .strip_prefix("application-")
            .unwrap_or(self.tag.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    pub name: String,
    #[serde(rename = "charm-url", default)]
    pub charm_url: String,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub constraints: BTreeMap<String, Value>,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub life: String,
    #[serde(rename = "min-units", default)]
    pub min_units: u32,
    #[serde(rename = "owner-tag", default)]
    pub owner_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(rename = "workload-version", default)]
    pub workload_version: String,
    /// Derived from unit deltas, never sent by the server.
    #[serde(
        rename = "unit-count",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub unit_count: Option<u32>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CharmChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    #[serde(rename = "charm-url")]
    pub charm_url: String,
    #[serde(rename = "charm-version", default)]
    pub charm_version: String,
    #[serde(default)]
    pub life: String,
    #[serde(default)]
    pub profile: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, Value>>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MachineChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub addresses: Vec<Value>,
    #[serde(rename = "agent-status", default)]
    pub agent_status: Status,
    #[serde(rename = "instance-status", default)]
    pub instance_status: Status,
    #[serde(rename = "instance-id", default)]
    pub instance_id: String,
    #[serde(default)]
    pub life: String,
    #[serde(default)]
    pub series: String,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub life: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(
        rename = "controller-uuid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_uuid: Option<String>,
    #[serde(
        rename = "is-controller",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_controller: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, Value>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(
        rename = "cloud-tag",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cloud_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModelChange {
    /// Overlay an incoming change, keeping known fields the change omits.
    pub fn merge_from(&mut self, incoming: &ModelChange) {
        if !incoming.model_uuid.is_empty() {
            self.model_uuid = incoming.model_uuid.clone();
        }
        overlay(&mut self.name, &incoming.name);
        overlay(&mut self.life, &incoming.life);
        overlay(&mut self.owner, &incoming.owner);
        overlay(&mut self.controller_uuid, &incoming.controller_uuid);
        overlay(&mut self.is_controller, &incoming.is_controller);
        overlay(&mut self.status, &incoming.status);
        overlay(&mut self.config, &incoming.config);
        overlay(&mut self.model_type, &incoming.model_type);
        overlay(&mut self.cloud_tag, &incoming.cloud_tag);
        overlay(&mut self.region, &incoming.region);
        overlay(&mut self.version, &incoming.version);
        for (key, value) in &incoming.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

fn overlay<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = Some(value.clone());
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelationChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    pub key: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub endpoints: Vec<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnitChange {
    #[serde(rename = "model-uuid")]
    pub model_uuid: String,
    pub name: String,
    #[serde(default)]
    pub application: String,
    #[serde(rename = "charm-url", default)]
    pub charm_url: String,
    #[serde(default)]
    pub life: String,
    #[serde(rename = "machine-id", default)]
    pub machine_id: String,
    #[serde(rename = "public-address", default)]
    pub public_address: String,
    #[serde(rename = "private-address", default)]
    pub private_address: String,
    #[serde(default)]
    pub principal: String,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(rename = "agent-status", default)]
    pub agent_status: Status,
    #[serde(rename = "workload-status", default)]
    pub workload_status: Status,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub ports: Vec<Value>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One entity payload, tagged by the kind that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityDelta {
    Action(ActionChange),
    Annotation(AnnotationChange),
    Application(ApplicationChange),
    Charm(CharmChange),
    Machine(MachineChange),
    Model(ModelChange),
    Relation(RelationChange),
    Unit(UnitChange),
}

impl EntityDelta {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDelta::Action(_) => EntityKind::Action,
            EntityDelta::Annotation(_) => EntityKind::Annotation,
            EntityDelta::Application(_) => EntityKind::Application,
            EntityDelta::Charm(_) => EntityKind::Charm,
            EntityDelta::Machine(_) => EntityKind::Machine,
            EntityDelta::Model(_) => EntityKind::Model,
            EntityDelta::Relation(_) => EntityKind::Relation,
            EntityDelta::Unit(_) => EntityKind::Unit,
        }
    }

    pub fn model_uuid(&self) -> &str {
        match self {
            EntityDelta::Action(change) => &change.model_uuid,
            EntityDelta::Annotation(change) => &change.model_uuid,
            EntityDelta::Application(change) => &change.model_uuid,
            EntityDelta::Charm(change) => &change.model_uuid,
            EntityDelta::Machine(change) => &change.model_uuid,
            EntityDelta::Model(change) => &change.model_uuid,
            EntityDelta::Relation(change) => &change.model_uuid,
            EntityDelta::Unit(change) => &change.model_uuid,
        }
    }

    /// The natural key of the entity inside its snapshot map.
    pub fn key(&self) -> &str {
        match self {
            EntityDelta::Action(change) => &change.id,
            EntityDelta::Annotation(change) => change.entity_name(),
            EntityDelta::Application(change) => &change.name,
            EntityDelta::Charm(change) => &change.charm_url,
            EntityDelta::Machine(change) => &change.id,
            EntityDelta::Model(change) => &change.model_uuid,
            EntityDelta::Relation(change) => &change.key,
            EntityDelta::Unit(change) => &change.name,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            EntityDelta::Action(change) => serde_json::to_value(change),
            EntityDelta::Annotation(change) => serde_json::to_value(change),
            EntityDelta::Application(change) => serde_json::to_value(change),
            EntityDelta::Charm(change) => serde_json::to_value(change),
            EntityDelta::Machine(change) => serde_json::to_value(change),
            EntityDelta::Model(change) => serde_json::to_value(change),
            EntityDelta::Relation(change) => serde_json::to_value(change),
            EntityDelta::Unit(change) => serde_json::to_value(change),
        }
    }

    fn from_payload(kind: EntityKind, payload: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::Action => EntityDelta::Action(serde_json::from_value(payload)?),
            EntityKind::Annotation => EntityDelta::Annotation(serde_json::from_value(payload)?),
            EntityKind::Application => EntityDelta::Application(serde_json::from_value(payload)?),
            EntityKind::Charm => EntityDelta::Charm(serde_json::from_value(payload)?),
            EntityKind::Machine => EntityDelta::Machine(serde_json::from_value(payload)?),
            EntityKind::Model => EntityDelta::Model(serde_json::from_value(payload)?),
            EntityKind::Relation => EntityDelta::Relation(serde_json::from_value(payload)?),
            EntityKind::Unit => EntityDelta::Unit(serde_json::from_value(payload)?),
        })
    }
}

/// A validated `[entityKind, changeKind, payload]` record from the watch feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub change: ChangeKind,
    pub entity: EntityDelta,
}

impl Delta {
    pub fn change(entity: EntityDelta) -> Self {
        Self {
            change: ChangeKind::Change,
            entity,
        }
    }

    pub fn remove(entity: EntityDelta) -> Self {
        Self {
            change: ChangeKind::Remove,
            entity,
        }
    }

    pub fn model_uuid(&self) -> &str {
        self.entity.model_uuid()
    }
}

impl Serialize for Delta {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let payload = self
            .entity
            .payload()
            .map_err(serde::ser::Error::custom)?;
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(self.entity.kind().as_str())?;
        tuple.serialize_element(self.change.as_str())?;
        tuple.serialize_element(&payload)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Delta {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        parse_delta(0, &value).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("delta batch is not an array")]
    NotAnArray,
    #[error("delta {index} has {len} elements, expected 3")]
    Arity { index: usize, len: usize },
    #[error("delta {index} has an element of the wrong type")]
    ElementType { index: usize },
    #[error("delta {index} has unknown entity kind {kind:?}")]
    UnknownEntityKind { index: usize, kind: String },
    #[error("delta {index} has unknown change kind {kind:?}")]
    UnknownChangeKind { index: usize, kind: String },
    #[error("delta {index} has a malformed {kind} payload: {message}")]
    Payload {
        index: usize,
        kind: EntityKind,
        message: String,
    },
}

fn parse_delta(index: usize, value: &Value) -> Result<Delta, DeltaError> {
    let items = value.as_array().ok_or(DeltaError::ElementType { index })?;
    if items.len() != 3 {
        return Err(DeltaError::Arity {
            index,
            len: items.len(),
        });
    }
    let (Some(kind), Some(change), Some(_)) =
        (items[0].as_str(), items[1].as_str(), items[2].as_object())
    else {
        return Err(DeltaError::ElementType { index });
    };
    let kind = kind
        .parse::<EntityKind>()
        .map_err(|_| DeltaError::UnknownEntityKind {
            index,
            kind: kind.to_string(),
        })?;
    let change = change
        .parse::<ChangeKind>()
        .map_err(|_| DeltaError::UnknownChangeKind {
            index,
            kind: change.to_string(),
        })?;
    let entity =
        EntityDelta::from_payload(kind, items[2].clone()).map_err(|err| DeltaError::Payload {
            index,
            kind,
            message: err.to_string(),
        })?;
    Ok(Delta { change, entity })
}

/// Validate a whole batch before any of it is applied. One malformed
/// element rejects the batch.
pub fn parse_deltas(value: &Value) -> Result<Vec<Delta>, DeltaError> {
    let items = value.as_array().ok_or(DeltaError::NotAnArray)?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_delta(index, item))
        .collect()
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(de::Error::custom("expected string or number for id")),
    }
}
