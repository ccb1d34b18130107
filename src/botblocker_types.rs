// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_TYPE_UPDATE_SUCCEEDED: &str = "UpdateSucceeded";
pub const CONDITION_TYPE_CLEANUP_SUCCEEDED: &str = "CleanupSucceeded";

pub const CONDITION_REASON_IN_PROGRESS: &str = "InProgress";
pub const CONDITION_REASON_SUCCESSFUL: &str = "Successful";
pub const CONDITION_REASON_READY: &str = "Ready";

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kube-botblocker.github.io",
    version = "v1alpha1",
    kind = "IngressConfig"
)]
#[kube(shortname = "ingconf", namespaced, status = "IngressConfigStatus")]
#[kube(
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.lastConditionStatus"}"#,
    printcolumn = r#"{"name":"Message", "type":"string", "jsonPath":".status.lastConditionMessage"}"#,
    printcolumn = r#"{"name":"Total", "type":"integer", "jsonPath":".status.rolloutCounts.total"}"#,
    printcolumn = r#"{"name":"Converged", "type":"integer", "jsonPath":".status.rolloutCounts.converged"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfigSpec {
    /// User agent patterns rejected with 403 by every Ingress referencing this config.
    pub blocked_user_agents: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RolloutCounts {
    pub total: i32,
    pub converged: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfigStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spec_hash: String,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Time>,
    #[serde(default)]
    pub rollout_counts: RolloutCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_condition_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_condition_message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl IngressConfig {
    pub fn spec_hash(&self) -> &str {
        self.status
            .as_ref()
            .map(|status| status.spec_hash.as_str())
            .unwrap_or("")
    }

    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }

    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn status_mut(&mut self) -> &mut IngressConfigStatus {
        self.status.get_or_insert_with(IngressConfigStatus::default)
    }
}
