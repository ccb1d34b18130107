// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, ListParams, PostParams},
    error::ErrorResponse,
    Client, ResourceExt,
};
use tracing::*;

use crate::botblocker_types::IngressConfig;
use crate::config::OperatorEnv;
use crate::fan_out::select;
use crate::store::{ObjectStore, StoreError, StoreRequest, StoreResponse};

/// Executes store requests against the Kubernetes API.
pub struct KubeStore {
    client: Client,
    /// Namespace Ingresses are listed in; `None` means all namespaces.
    target_namespace: Option<String>,
}

impl KubeStore {
    pub fn new(client: Client, env: &OperatorEnv) -> Self {
        KubeStore {
            client,
            target_namespace: env.target_namespace().map(str::to_string),
        }
    }

    fn config_api(&self, namespace: &str) -> Api<IngressConfig> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ingress_api(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn ingress_list_api(&self) -> Api<Ingress> {
        match &self.target_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn execute(&self, request: StoreRequest) -> StoreResponse {
        let key = request.key();
        let pp = PostParams::default();
        let response = match request {
            StoreRequest::GetConfig(key) => StoreResponse::GetConfig(
                self.config_api(&key.namespace)
                    .get(&key.name)
                    .await
                    .map_err(StoreError::from),
            ),
            StoreRequest::GetTarget(key) => StoreResponse::GetTarget(
                self.ingress_api(&key.namespace)
                    .get(&key.name)
                    .await
                    .map_err(StoreError::from),
            ),
            StoreRequest::ListTargets(selector) => StoreResponse::ListTargets(
                self.ingress_list_api()
                    .list(&ListParams::default())
                    .await
                    .map(|list| select(list.items, &selector))
                    .map_err(StoreError::from),
            ),
            StoreRequest::UpdateConfig(obj) => StoreResponse::UpdateConfig(
                self.config_api(&obj.namespace().unwrap_or_default())
                    .replace(&obj.name_any(), &pp, &obj)
                    .await
                    .map_err(StoreError::from),
            ),
            StoreRequest::UpdateConfigStatus(obj) => {
                let api = self.config_api(&obj.namespace().unwrap_or_default());
                let res = match serde_json::to_vec(&obj) {
                    Ok(data) => api
                        .replace_status(&obj.name_any(), &pp, data)
                        .await
                        .map_err(StoreError::from),
                    Err(e) => Err(StoreError::Other(e.to_string())),
                };
                StoreResponse::UpdateConfigStatus(res)
            }
            StoreRequest::UpdateTarget(obj) => StoreResponse::UpdateTarget(
                self.ingress_api(&obj.namespace().unwrap_or_default())
                    .replace(&obj.name_any(), &pp, &obj)
                    .await
                    .map_err(StoreError::from),
            ),
        };
        debug!(request = %key, "store request executed");
        response
    }
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match &error {
            kube::Error::Api(ErrorResponse { reason, .. }) if reason == "NotFound" => {
                StoreError::ObjectNotFound
            }
            kube::Error::Api(ErrorResponse { reason, .. }) if reason == "Conflict" => {
                StoreError::Conflict
            }
            _ => StoreError::Other(error.to_string()),
        }
    }
}
