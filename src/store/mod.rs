// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Requests the reconcilers issue against the object store, and the store
//! interface that executes them.
//!
//! There is one variant per object kind because the executor needs the
//! concrete type to build a typed `kube::Api` handle.
pub mod kube_store;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};
use thiserror::Error;

use crate::botblocker_types::IngressConfig;
use crate::fan_out::TargetSelector;
use crate::Error;

pub use kube_store::KubeStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        ObjectKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self, Error> {
        let name = obj
            .meta()
            .name
            .as_ref()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let namespace = obj
            .meta()
            .namespace
            .as_ref()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        Ok(ObjectKey::new(namespace, name))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub enum StoreRequest {
    GetConfig(ObjectKey),
    GetTarget(ObjectKey),
    ListTargets(TargetSelector),
    /// Replaces metadata and spec; used for finalizers.
    UpdateConfig(IngressConfig),
    UpdateConfigStatus(IngressConfig),
    UpdateTarget(Ingress),
}

impl StoreRequest {
    pub fn key(&self) -> String {
        match self {
            StoreRequest::GetConfig(key) => format!("IngressConfig/{}", key),
            StoreRequest::GetTarget(key) => format!("Ingress/{}", key),
            StoreRequest::ListTargets(selector) => format!("Ingress?{}", selector),
            StoreRequest::UpdateConfig(obj) | StoreRequest::UpdateConfigStatus(obj) => format!(
                "IngressConfig/{}/{}",
                obj.namespace().unwrap_or_default(),
                obj.name_any()
            ),
            StoreRequest::UpdateTarget(obj) => format!(
                "Ingress/{}/{}",
                obj.namespace().unwrap_or_default(),
                obj.name_any()
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StoreResponse {
    GetConfig(Result<IngressConfig, StoreError>),
    GetTarget(Result<Ingress, StoreError>),
    ListTargets(Result<Vec<Ingress>, StoreError>),
    UpdateConfig(Result<IngressConfig, StoreError>),
    UpdateConfigStatus(Result<IngressConfig, StoreError>),
    UpdateTarget(Result<Ingress, StoreError>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("ObjectNotFound")]
    ObjectNotFound,
    #[error("Conflict")]
    Conflict,
    #[error("{0}")]
    Other(String),
}

/// The object store the reconcilers run against. Updates carry the
/// resource version they were read at; a stale one yields `Conflict`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn execute(&self, request: StoreRequest) -> StoreResponse;
}
