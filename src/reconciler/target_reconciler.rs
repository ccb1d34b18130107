// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::networking::v1::Ingress;
use tracing::*;

use crate::annotations::*;
use crate::botblocker_types::IngressConfig;
use crate::config::OperatorEnv;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::snippet::{build_nginx_config, update_server_snippet, MergeError};
use crate::store::{ObjectKey, StoreError, StoreRequest, StoreResponse};
use crate::Error;

/// Keeps one Ingress in sync with the IngressConfig it references.
pub struct TargetReconciler {
    env: OperatorEnv,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetReconcileStep {
    Init,
    AfterGetTarget,
    AfterGetConfig,
    AfterUpdateTarget,
    Done(ReconcileOutcome),
    Error(Error),
}

#[derive(Debug, Clone)]
pub struct TargetReconcileState {
    pub reconcile_step: TargetReconcileStep,
    pub ingress: Option<Ingress>,
}

impl TargetReconciler {
    pub fn new(env: &OperatorEnv) -> Self {
        TargetReconciler { env: env.clone() }
    }
}

impl Reconciler for TargetReconciler {
    type T = TargetReconcileState;

    const KIND: &'static str = "Ingress";

    fn reconcile_init_state(&self) -> TargetReconcileState {
        TargetReconcileState {
            reconcile_step: TargetReconcileStep::Init,
            ingress: None,
        }
    }

    fn reconcile_core(
        &self,
        key: &ObjectKey,
        resp_o: Option<StoreResponse>,
        state: TargetReconcileState,
    ) -> (TargetReconcileState, Option<StoreRequest>) {
        match &state.reconcile_step {
            TargetReconcileStep::Init => {
                if !self.env.manages_namespace(&key.namespace) {
                    debug!(ingress = %key, "Ingress outside the operator namespace; ignoring");
                    return (done_state(state, ReconcileOutcome::Done), None);
                }
                let state_prime = TargetReconcileState {
                    reconcile_step: TargetReconcileStep::AfterGetTarget,
                    ..state
                };
                (state_prime, Some(StoreRequest::GetTarget(key.clone())))
            }
            TargetReconcileStep::AfterGetTarget => match resp_o {
                Some(StoreResponse::GetTarget(Ok(ingress))) => self.reconcile_ingress(key, ingress, state),
                Some(StoreResponse::GetTarget(Err(StoreError::ObjectNotFound))) => {
                    info!(ingress = %key, "Ingress not found");
                    (done_state(state, ReconcileOutcome::Done), None)
                }
                Some(StoreResponse::GetTarget(Err(e))) => {
                    store_failed(state, format!("Ingress/{}", key), e)
                }
                _ => unexpected_response(state, "AfterGetTarget"),
            },
            TargetReconcileStep::AfterGetConfig => {
                let ingress = match state.ingress.clone() {
                    Some(ingress) => ingress,
                    None => return unexpected_response(state, "AfterGetConfig"),
                };
                let config_name = ingress_config_name(&ingress.metadata).unwrap_or_default().to_string();
                match resp_o {
                    Some(StoreResponse::GetConfig(Ok(config))) => attach(key, ingress, &config, state),
                    Some(StoreResponse::GetConfig(Err(StoreError::ObjectNotFound))) => {
                        info!(
                            ingress = %key,
                            ingress_config_name = %config_name,
                            "Specified IngressConfig not found in operator namespace; skipping update"
                        );
                        (done_state(state, ReconcileOutcome::Done), None)
                    }
                    Some(StoreResponse::GetConfig(Err(e))) => store_failed(
                        state,
                        format!("IngressConfig/{}/{}", self.env.operator_namespace, config_name),
                        e,
                    ),
                    _ => unexpected_response(state, "AfterGetConfig"),
                }
            }
            TargetReconcileStep::AfterUpdateTarget => match resp_o {
                Some(StoreResponse::UpdateTarget(Ok(_))) => {
                    info!(ingress = %key, "Ingress annotations updated successfully");
                    (done_state(state, ReconcileOutcome::Done), None)
                }
                Some(StoreResponse::UpdateTarget(Err(StoreError::ObjectNotFound))) => {
                    (done_state(state, ReconcileOutcome::Done), None)
                }
                Some(StoreResponse::UpdateTarget(Err(e))) => {
                    warn!(ingress = %key, error = %e, "Failed updating Ingress annotations");
                    store_failed(state, format!("Ingress/{}", key), e)
                }
                _ => unexpected_response(state, "AfterUpdateTarget"),
            },
            TargetReconcileStep::Done(_) | TargetReconcileStep::Error(_) => (state, None),
        }
    }

    fn reconcile_done(&self, state: &TargetReconcileState) -> Option<ReconcileOutcome> {
        match state.reconcile_step {
            TargetReconcileStep::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn reconcile_error(&self, state: &TargetReconcileState) -> Option<Error> {
        match &state.reconcile_step {
            TargetReconcileStep::Error(e) => Some(e.clone()),
            _ => None,
        }
    }
}

impl TargetReconciler {
    fn reconcile_ingress(
        &self,
        key: &ObjectKey,
        ingress: Ingress,
        state: TargetReconcileState,
    ) -> (TargetReconcileState, Option<StoreRequest>) {
        match ingress_config_name(&ingress.metadata) {
            Some(config_name) => {
                let config_key = ObjectKey::new(&self.env.operator_namespace, config_name);
                let state_prime = TargetReconcileState {
                    reconcile_step: TargetReconcileStep::AfterGetConfig,
                    ingress: Some(ingress),
                };
                (state_prime, Some(StoreRequest::GetConfig(config_key)))
            }
            // The Ingress opted out: clean up whatever the operator added before.
            None => match detach(&ingress) {
                Ok(Some(ingress_prime)) => {
                    info!(ingress = %key, "Started cleaning operation for Ingress");
                    update_target(state, ingress_prime)
                }
                Ok(None) => {
                    debug!(ingress = %key, "No changes detected; skipping update");
                    (done_state(state, ReconcileOutcome::Done), None)
                }
                Err(e) => merge_failed(state, key, e),
            },
        }
    }
}

fn attach(
    key: &ObjectKey,
    ingress: Ingress,
    config: &IngressConfig,
    state: TargetReconcileState,
) -> (TargetReconcileState, Option<StoreRequest>) {
    if config.is_being_deleted() {
        info!(ingress = %key, "Referenced IngressConfig is being deleted; skipping update");
        return (done_state(state, ReconcileOutcome::Done), None);
    }
    let spec_hash = config.spec_hash();
    if spec_hash.is_empty() {
        debug!(ingress = %key, "Referenced IngressConfig has no spec hash yet; skipping update");
        return (done_state(state, ReconcileOutcome::Done), None);
    }
    if local_spec_hash(&ingress.metadata) == Some(spec_hash) {
        debug!(ingress = %key, "Ingress already synchronized; skipping update");
        return (done_state(state, ReconcileOutcome::Done), None);
    }

    let desired = build_nginx_config(&config.spec.blocked_user_agents);
    let updated = match update_server_snippet(server_snippet(&ingress.metadata), &desired) {
        Ok(updated) => updated,
        Err(e) => return merge_failed(state, key, e),
    };
    let mut ingress_prime = ingress;
    let annotations = annotations_mut(&mut ingress_prime.metadata);
    set_server_snippet(annotations, updated);
    annotations.insert(
        INGRESS_CONFIG_SPEC_HASH_ANNOTATION.to_string(),
        spec_hash.to_string(),
    );
    update_target(state, ingress_prime)
}

/// Removes the operator block, the spec hash and the reference.
/// Returns `None` when the Ingress carries none of them.
pub fn detach(ingress: &Ingress) -> Result<Option<Ingress>, MergeError> {
    remove_operator_content(ingress, true)
}

/// Removes the operator block and the reference but keeps the spec hash, so
/// the Ingress' own reconcile still has to run to finish the detach.
pub fn strip_reference(ingress: &Ingress) -> Result<Option<Ingress>, MergeError> {
    remove_operator_content(ingress, false)
}

fn remove_operator_content(ingress: &Ingress, drop_spec_hash: bool) -> Result<Option<Ingress>, MergeError> {
    let annotations = match ingress.metadata.annotations.as_ref() {
        Some(annotations) => annotations,
        None => return Ok(None),
    };
    let mut annotations_prime = annotations.clone();
    if let Some(current) = annotations.get(INGRESS_SERVER_SNIPPET_ANNOTATION) {
        let cleaned = update_server_snippet(current, "")?;
        set_server_snippet(&mut annotations_prime, cleaned);
    }
    annotations_prime.remove(INGRESS_CONFIG_NAME_ANNOTATION);
    if drop_spec_hash {
        annotations_prime.remove(INGRESS_CONFIG_SPEC_HASH_ANNOTATION);
    }
    if &annotations_prime == annotations {
        return Ok(None);
    }
    let mut ingress_prime = ingress.clone();
    ingress_prime.metadata.annotations = Some(annotations_prime);
    Ok(Some(ingress_prime))
}

fn update_target(
    state: TargetReconcileState,
    ingress_prime: Ingress,
) -> (TargetReconcileState, Option<StoreRequest>) {
    let state_prime = TargetReconcileState {
        reconcile_step: TargetReconcileStep::AfterUpdateTarget,
        ingress: Some(ingress_prime.clone()),
    };
    (state_prime, Some(StoreRequest::UpdateTarget(ingress_prime)))
}

fn merge_failed(
    state: TargetReconcileState,
    key: &ObjectKey,
    e: MergeError,
) -> (TargetReconcileState, Option<StoreRequest>) {
    error!(ingress = %key, error = %e, "Failed to update server-snippet annotation");
    (error_state(state, Error::Merge(e)), None)
}

fn store_failed(
    state: TargetReconcileState,
    request: String,
    e: StoreError,
) -> (TargetReconcileState, Option<StoreRequest>) {
    (error_state(state, Error::StoreRequestFailed(request, e)), None)
}

fn unexpected_response(
    state: TargetReconcileState,
    step: &'static str,
) -> (TargetReconcileState, Option<StoreRequest>) {
    (error_state(state, Error::UnexpectedResponse(step)), None)
}

fn done_state(state: TargetReconcileState, outcome: ReconcileOutcome) -> TargetReconcileState {
    TargetReconcileState {
        reconcile_step: TargetReconcileStep::Done(outcome),
        ..state
    }
}

fn error_state(state: TargetReconcileState, e: Error) -> TargetReconcileState {
    TargetReconcileState {
        reconcile_step: TargetReconcileStep::Error(e),
        ..state
    }
}
