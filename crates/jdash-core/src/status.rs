//! Full status as returned by `Client.FullStatus`. Only the fields the
//! dashboard reads are typed; everything else is kept in `extra` so the
//! status can be stored and re-serialized without loss.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetailedStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelStatusInfo {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub model_type: String,
    #[serde(rename = "cloud-tag", default)]
    pub cloud_tag: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(rename = "available-version", default)]
    pub available_version: String,
    #[serde(rename = "model-status", default)]
    pub model_status: DetailedStatus,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnitStatus {
    #[serde(rename = "agent-status", default)]
    pub agent_status: DetailedStatus,
    #[serde(rename = "workload-status", default)]
    pub workload_status: DetailedStatus,
    #[serde(default)]
    pub machine: String,
    #[serde(rename = "public-address", default)]
    pub public_address: String,
    #[serde(default)]
    pub charm: String,
    #[serde(default)]
    pub leader: bool,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub subordinates: BTreeMap<String, UnitStatus>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApplicationStatus {
    #[serde(default)]
    pub charm: String,
    #[serde(rename = "charm-channel", default)]
    pub charm_channel: Option<String>,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub life: String,
    #[serde(default)]
    pub status: DetailedStatus,
    #[serde(rename = "workload-version", default)]
    pub workload_version: String,
    #[serde(rename = "subordinate-to", default, deserialize_with = "crate::nullable")]
    pub subordinate_to: Vec<String>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub units: BTreeMap<String, UnitStatus>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub relations: BTreeMap<String, Vec<String>>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MachineStatus {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "agent-status", default)]
    pub agent_status: DetailedStatus,
    #[serde(rename = "instance-status", default)]
    pub instance_status: DetailedStatus,
    #[serde(rename = "instance-id", default)]
    pub instance_id: String,
    #[serde(rename = "dns-name", default)]
    pub dns_name: String,
    #[serde(default)]
    pub series: String,
    #[serde(rename = "ip-addresses", default, deserialize_with = "crate::nullable")]
    pub ip_addresses: Vec<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelationStatus {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub endpoints: Vec<Value>,
    #[serde(default)]
    pub status: DetailedStatus,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FullStatus {
    #[serde(default)]
    pub model: ModelStatusInfo,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub applications: BTreeMap<String, ApplicationStatus>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub machines: BTreeMap<String, MachineStatus>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub relations: Vec<RelationStatus>,
    #[serde(default, deserialize_with = "crate::nullable")]
    pub offers: BTreeMap<String, Value>,
    #[serde(rename = "remote-applications", default, deserialize_with = "crate::nullable")]
    pub remote_applications: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Value>,
    #[serde(
        rename = "controller-timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_timestamp: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FullStatus {
    /// Drop the fields that change on every fetch without carrying model
    /// state, so repeated polls do not churn the store.
    pub fn without_volatile(mut self) -> Self {
        self.branches = None;
        self.controller_timestamp = None;
        self
    }

    pub fn unit_count(&self, application: &str) -> usize {
        self.applications
            .get(application)
            .map(|app| app.units.len())
            .unwrap_or(0)
    }
}
