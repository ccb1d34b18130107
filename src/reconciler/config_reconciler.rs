// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Rollout and deletion state machine for IngressConfig objects.
//!
//! A live IngressConfig moves through initializing (spec hash persisted),
//! rollout started (counters reset, `UpdateSucceeded=False`) and converging
//! (counters recomputed from the fan-out index until every referencing Ingress
//! carries the current spec hash). The status flip to `UpdateSucceeded=False`
//! is what fans the change out to the Ingresses; this reconciler never calls
//! the Ingress reconciler itself.
//!
//! Deletion is guarded by a finalizer and runs in two phases. Phase 1 marks
//! `CleanupSucceeded=False` and strips the reference and block from every
//! referencing Ingress. Phase 2 runs on later passes and waits until no
//! detached Ingress still carries this config's spec hash before releasing
//! the finalizer.
use chrono::Utc;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::time::Duration;
use tracing::*;

use crate::annotations::{add_finalizer, has_finalizer, remove_finalizer, INGRESS_CONFIG_FINALIZER};
use crate::botblocker_types::*;
use crate::conditions::{find_status_condition, new_condition, set_status_condition};
use crate::config::OperatorEnv;
use crate::fan_out::TargetSelector;
use crate::reconciler::target_reconciler::strip_reference;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::rollout::{self, record_update_condition, RolloutPhase};
use crate::spec_hash::fingerprint;
use crate::store::{ObjectKey, StoreError, StoreRequest, StoreResponse};
use crate::Error;

pub const MESSAGE_CLEANUP_IN_PROGRESS: &str = "Removing configuration from associated Ingresses";

pub struct ConfigReconciler {
    poll_interval: Duration,
    resync_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigReconcileStep {
    Init,
    AfterGetConfig,
    AfterAddFinalizer,
    AfterInitSpecHash,
    AfterStartRollout,
    AfterListTargets,
    AfterUpdateRolloutStatus(RolloutPhase),
    AfterMarkCleanup,
    AfterListCleanupTargets,
    AfterDetachTarget,
    AfterListResidualTargets,
    AfterRemoveFinalizer,
    Done(ReconcileOutcome),
    Error(Error),
}

#[derive(Debug, Clone)]
pub struct ConfigReconcileState {
    pub reconcile_step: ConfigReconcileStep,
    /// Latest version of the IngressConfig seen by this pass.
    pub config: Option<IngressConfig>,
    /// Ingresses still to be stripped during cleanup.
    pub pending_targets: Vec<Ingress>,
    /// Cleanup phase 1 already ran in an earlier pass.
    pub cleanup_resumed: bool,
}

type Step = (ConfigReconcileState, Option<StoreRequest>);

impl ConfigReconciler {
    pub fn new(env: &OperatorEnv) -> Self {
        ConfigReconciler {
            poll_interval: env.rollout_poll_interval(),
            resync_interval: env.resync_interval(),
        }
    }
}

impl Reconciler for ConfigReconciler {
    type T = ConfigReconcileState;

    const KIND: &'static str = "IngressConfig";

    fn reconcile_init_state(&self) -> ConfigReconcileState {
        ConfigReconcileState {
            reconcile_step: ConfigReconcileStep::Init,
            config: None,
            pending_targets: Vec::new(),
            cleanup_resumed: false,
        }
    }

    fn reconcile_core(
        &self,
        key: &ObjectKey,
        resp_o: Option<StoreResponse>,
        state: ConfigReconcileState,
    ) -> Step {
        let config_ref = format!("IngressConfig/{}", key);
        match &state.reconcile_step {
            ConfigReconcileStep::Init => {
                let state_prime = ConfigReconcileState {
                    reconcile_step: ConfigReconcileStep::AfterGetConfig,
                    ..state
                };
                (state_prime, Some(StoreRequest::GetConfig(key.clone())))
            }
            ConfigReconcileStep::AfterGetConfig => match resp_o {
                Some(StoreResponse::GetConfig(Ok(config))) => self.reconcile_config(key, config, state),
                Some(StoreResponse::GetConfig(Err(StoreError::ObjectNotFound))) => {
                    info!(ingress_config = %key, "IngressConfig not found, end reconcile");
                    (done_state(state, ReconcileOutcome::Done), None)
                }
                Some(StoreResponse::GetConfig(Err(e))) => store_failed(state, config_ref, e),
                _ => unexpected_response(state, "AfterGetConfig"),
            },
            ConfigReconcileStep::AfterAddFinalizer => match resp_o {
                Some(StoreResponse::UpdateConfig(Ok(config))) => self.reconcile_live(key, config, state),
                Some(StoreResponse::UpdateConfig(Err(e))) => store_failed(state, config_ref, e),
                _ => unexpected_response(state, "AfterAddFinalizer"),
            },
            ConfigReconcileStep::AfterInitSpecHash => match resp_o {
                Some(StoreResponse::UpdateConfigStatus(Ok(config))) => {
                    debug!(ingress_config = %key, spec_hash = %config.spec_hash(), "Spec hash initialized");
                    let state_prime = ConfigReconcileState {
                        config: Some(config),
                        ..state
                    };
                    (done_state(state_prime, ReconcileOutcome::requeue_now()), None)
                }
                Some(StoreResponse::UpdateConfigStatus(Err(e))) => store_failed(state, config_ref, e),
                _ => unexpected_response(state, "AfterInitSpecHash"),
            },
            ConfigReconcileStep::AfterStartRollout => match resp_o {
                Some(StoreResponse::UpdateConfigStatus(Ok(config))) => {
                    info!(ingress_config = %key, "Rolling update on all associated Ingresses");
                    let state_prime = ConfigReconcileState {
                        config: Some(config),
                        ..state
                    };
                    (done_state(state_prime, ReconcileOutcome::Done), None)
                }
                Some(StoreResponse::UpdateConfigStatus(Err(e))) => {
                    warn!(ingress_config = %key, error = %e, "Failed to update IngressConfig status");
                    store_failed(state, config_ref, e)
                }
                _ => unexpected_response(state, "AfterStartRollout"),
            },
            ConfigReconcileStep::AfterListTargets => match resp_o {
                Some(StoreResponse::ListTargets(Ok(targets))) => self.converge(key, targets, state),
                Some(StoreResponse::ListTargets(Err(e))) => {
                    store_failed(state, format!("Ingress?ingressConfigName={}", key.name), e)
                }
                _ => unexpected_response(state, "AfterListTargets"),
            },
            ConfigReconcileStep::AfterUpdateRolloutStatus(phase) => {
                let phase = *phase;
                match resp_o {
                    Some(StoreResponse::UpdateConfigStatus(Ok(config))) => {
                        if phase.is_ready() {
                            info!(ingress_config = %key, "Finished updating associated Ingresses");
                        }
                        let outcome = self.rollout_outcome(phase);
                        let state_prime = ConfigReconcileState {
                            config: Some(config),
                            ..state
                        };
                        (done_state(state_prime, outcome), None)
                    }
                    Some(StoreResponse::UpdateConfigStatus(Err(e))) => {
                        warn!(ingress_config = %key, error = %e, "Failed to update IngressConfig status");
                        store_failed(state, config_ref, e)
                    }
                    _ => unexpected_response(state, "AfterUpdateRolloutStatus"),
                }
            }
            ConfigReconcileStep::AfterMarkCleanup => match resp_o {
                Some(StoreResponse::UpdateConfigStatus(Ok(config))) => {
                    info!(ingress_config = %key, "Started cleaning up associated Ingresses");
                    let state_prime = ConfigReconcileState {
                        reconcile_step: ConfigReconcileStep::AfterListCleanupTargets,
                        config: Some(config),
                        ..state
                    };
                    let selector = TargetSelector::ReferencingConfig(key.name.clone());
                    (state_prime, Some(StoreRequest::ListTargets(selector)))
                }
                Some(StoreResponse::UpdateConfigStatus(Err(e))) => store_failed(state, config_ref, e),
                _ => unexpected_response(state, "AfterMarkCleanup"),
            },
            ConfigReconcileStep::AfterListCleanupTargets => match resp_o {
                Some(StoreResponse::ListTargets(Ok(targets))) => {
                    let state_prime = ConfigReconcileState {
                        pending_targets: targets,
                        ..state
                    };
                    self.detach_next(key, state_prime)
                }
                Some(StoreResponse::ListTargets(Err(e))) => {
                    store_failed(state, format!("Ingress?ingressConfigName={}", key.name), e)
                }
                _ => unexpected_response(state, "AfterListCleanupTargets"),
            },
            ConfigReconcileStep::AfterDetachTarget => match resp_o {
                // An Ingress deleted in the meantime needs no cleanup.
                Some(StoreResponse::UpdateTarget(Ok(_)))
                | Some(StoreResponse::UpdateTarget(Err(StoreError::ObjectNotFound))) => {
                    self.detach_next(key, state)
                }
                Some(StoreResponse::UpdateTarget(Err(e))) => {
                    warn!(ingress_config = %key, error = %e, "Failed cleaning associated Ingress");
                    store_failed(state, "Ingress".to_string(), e)
                }
                _ => unexpected_response(state, "AfterDetachTarget"),
            },
            ConfigReconcileStep::AfterListResidualTargets => match resp_o {
                Some(StoreResponse::ListTargets(Ok(residual))) => self.release_finalizer(key, residual, state),
                Some(StoreResponse::ListTargets(Err(e))) => {
                    store_failed(state, "Ingress?ingressConfigName=".to_string(), e)
                }
                _ => unexpected_response(state, "AfterListResidualTargets"),
            },
            ConfigReconcileStep::AfterRemoveFinalizer => match resp_o {
                Some(StoreResponse::UpdateConfig(Ok(_)))
                | Some(StoreResponse::UpdateConfig(Err(StoreError::ObjectNotFound))) => {
                    info!(ingress_config = %key, "Cleanup finished, finalizer removed");
                    (done_state(state, ReconcileOutcome::Done), None)
                }
                Some(StoreResponse::UpdateConfig(Err(e))) => store_failed(state, config_ref, e),
                _ => unexpected_response(state, "AfterRemoveFinalizer"),
            },
            ConfigReconcileStep::Done(_) | ConfigReconcileStep::Error(_) => (state, None),
        }
    }

    fn reconcile_done(&self, state: &ConfigReconcileState) -> Option<ReconcileOutcome> {
        match state.reconcile_step {
            ConfigReconcileStep::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    fn reconcile_error(&self, state: &ConfigReconcileState) -> Option<Error> {
        match &state.reconcile_step {
            ConfigReconcileStep::Error(e) => Some(e.clone()),
            _ => None,
        }
    }
}

impl ConfigReconciler {
    fn reconcile_config(&self, key: &ObjectKey, config: IngressConfig, state: ConfigReconcileState) -> Step {
        let finalized = has_finalizer(&config.metadata, INGRESS_CONFIG_FINALIZER);
        if config.is_being_deleted() {
            if !finalized {
                debug!(ingress_config = %key, "IngressConfig being deleted without finalizer; nothing to do");
                return (done_state(state, ReconcileOutcome::Done), None);
            }
            return self.start_cleanup(key, config, state);
        }
        if !finalized {
            let mut config_prime = config;
            add_finalizer(&mut config_prime.metadata, INGRESS_CONFIG_FINALIZER);
            let state_prime = ConfigReconcileState {
                reconcile_step: ConfigReconcileStep::AfterAddFinalizer,
                ..state
            };
            return (state_prime, Some(StoreRequest::UpdateConfig(config_prime)));
        }
        self.reconcile_live(key, config, state)
    }

    fn reconcile_live(&self, key: &ObjectKey, config: IngressConfig, state: ConfigReconcileState) -> Step {
        if config.spec_hash().is_empty() {
            let spec_hash = match fingerprint(&config.spec) {
                Ok(spec_hash) => spec_hash,
                Err(e) => return hash_failed(state, key, e),
            };
            let mut config_prime = config;
            config_prime.status_mut().spec_hash = spec_hash;
            let state_prime = ConfigReconcileState {
                reconcile_step: ConfigReconcileStep::AfterInitSpecHash,
                ..state
            };
            return (state_prime, Some(StoreRequest::UpdateConfigStatus(config_prime)));
        }

        if rollout_pending(&config) {
            let spec_hash = match fingerprint(&config.spec) {
                Ok(spec_hash) => spec_hash,
                Err(e) => return hash_failed(state, key, e),
            };
            let now = Time(Utc::now());
            let generation = config.generation();
            let mut config_prime = config;
            let status = config_prime.status_mut();
            status.spec_hash = spec_hash;
            status.observed_generation = generation;
            status.rollout_counts = RolloutCounts::default();
            record_update_condition(status, rollout::update_condition(RolloutPhase::InProgress, now.clone()));
            status.last_updated = Some(now);
            let state_prime = ConfigReconcileState {
                reconcile_step: ConfigReconcileStep::AfterStartRollout,
                ..state
            };
            return (state_prime, Some(StoreRequest::UpdateConfigStatus(config_prime)));
        }

        let selector = TargetSelector::ReferencingConfig(config.name_any());
        let state_prime = ConfigReconcileState {
            reconcile_step: ConfigReconcileStep::AfterListTargets,
            config: Some(config),
            ..state
        };
        (state_prime, Some(StoreRequest::ListTargets(selector)))
    }

    fn converge(&self, key: &ObjectKey, targets: Vec<Ingress>, state: ConfigReconcileState) -> Step {
        let config = match state.config.clone() {
            Some(config) => config,
            None => return unexpected_response(state, "AfterListTargets"),
        };
        let counts = rollout::count(&targets, config.spec_hash());
        let phase = rollout::phase(counts);
        debug!(
            ingress_config = %key,
            total = counts.total,
            converged = counts.converged,
            "Rollout progress"
        );

        let mut config_prime = config;
        let status = config_prime.status_mut();
        let mut changed = status.rollout_counts != counts;
        status.rollout_counts = counts;
        changed |= record_update_condition(status, rollout::update_condition(phase, Time(Utc::now())));
        if !changed {
            return (done_state(state, self.rollout_outcome(phase)), None);
        }
        let state_prime = ConfigReconcileState {
            reconcile_step: ConfigReconcileStep::AfterUpdateRolloutStatus(phase),
            ..state
        };
        (state_prime, Some(StoreRequest::UpdateConfigStatus(config_prime)))
    }

    fn rollout_outcome(&self, phase: RolloutPhase) -> ReconcileOutcome {
        if phase.is_ready() {
            ReconcileOutcome::RequeueAfter(self.resync_interval)
        } else {
            ReconcileOutcome::RequeueAfter(self.poll_interval)
        }
    }

    fn start_cleanup(&self, key: &ObjectKey, config: IngressConfig, state: ConfigReconcileState) -> Step {
        let resumed = config
            .status
            .as_ref()
            .and_then(|status| find_status_condition(&status.conditions, CONDITION_TYPE_CLEANUP_SUCCEEDED))
            .is_some();
        if resumed {
            let state_prime = ConfigReconcileState {
                reconcile_step: ConfigReconcileStep::AfterListCleanupTargets,
                config: Some(config),
                cleanup_resumed: true,
                ..state
            };
            let selector = TargetSelector::ReferencingConfig(key.name.clone());
            return (state_prime, Some(StoreRequest::ListTargets(selector)));
        }

        let mut config_prime = config;
        set_status_condition(
            &mut config_prime.status_mut().conditions,
            new_condition(
                CONDITION_TYPE_CLEANUP_SUCCEEDED,
                false,
                CONDITION_REASON_IN_PROGRESS,
                MESSAGE_CLEANUP_IN_PROGRESS,
                Time(Utc::now()),
            ),
        );
        let state_prime = ConfigReconcileState {
            reconcile_step: ConfigReconcileStep::AfterMarkCleanup,
            ..state
        };
        (state_prime, Some(StoreRequest::UpdateConfigStatus(config_prime)))
    }

    fn detach_next(&self, key: &ObjectKey, state: ConfigReconcileState) -> Step {
        let mut state = state;
        while let Some(ingress) = state.pending_targets.pop() {
            match strip_reference(&ingress) {
                Ok(Some(ingress_prime)) => {
                    debug!(
                        ingress_config = %key,
                        ingress = %ingress_prime.name_any(),
                        "Stripping configuration from Ingress"
                    );
                    let state_prime = ConfigReconcileState {
                        reconcile_step: ConfigReconcileStep::AfterDetachTarget,
                        ..state
                    };
                    return (state_prime, Some(StoreRequest::UpdateTarget(ingress_prime)));
                }
                Ok(None) => continue,
                Err(e) => {
                    error!(
                        ingress_config = %key,
                        ingress = %ingress.name_any(),
                        error = %e,
                        "Failed cleaning Ingress server-snippet annotation"
                    );
                    return (error_state(state, Error::Merge(e)), None);
                }
            }
        }

        if !state.cleanup_resumed {
            return (done_state(state, ReconcileOutcome::RequeueAfter(self.poll_interval)), None);
        }
        // Only Ingresses detached from this config at its current spec hash
        // count; other configs' leftovers are not ours to wait for.
        let spec_hash = match state.config.as_ref() {
            Some(config) => config.spec_hash().to_string(),
            None => return unexpected_response(state, "AfterDetachTarget"),
        };
        let state_prime = ConfigReconcileState {
            reconcile_step: ConfigReconcileStep::AfterListResidualTargets,
            ..state
        };
        let selector = TargetSelector::DetachedWithFingerprint(spec_hash);
        (state_prime, Some(StoreRequest::ListTargets(selector)))
    }

    fn release_finalizer(&self, key: &ObjectKey, residual: Vec<Ingress>, state: ConfigReconcileState) -> Step {
        if !residual.is_empty() {
            info!(
                ingress_config = %key,
                remaining = residual.len(),
                "Waiting for detached Ingresses to finish cleanup"
            );
            return (done_state(state, ReconcileOutcome::RequeueAfter(self.poll_interval)), None);
        }
        let mut config_prime = match state.config.clone() {
            Some(config) => config,
            None => return unexpected_response(state, "AfterListResidualTargets"),
        };
        remove_finalizer(&mut config_prime.metadata, INGRESS_CONFIG_FINALIZER);
        let state_prime = ConfigReconcileState {
            reconcile_step: ConfigReconcileStep::AfterRemoveFinalizer,
            ..state
        };
        (state_prime, Some(StoreRequest::UpdateConfig(config_prime)))
    }
}

/// A rollout is due when the spec changed since the last one, or none ran yet.
pub fn rollout_pending(config: &IngressConfig) -> bool {
    match config.status.as_ref() {
        Some(status) => status.last_updated.is_none() || status.observed_generation != config.generation(),
        None => true,
    }
}

fn hash_failed(state: ConfigReconcileState, key: &ObjectKey, e: Error) -> Step {
    error!(ingress_config = %key, error = %e, "Failed hashing IngressConfig spec");
    (error_state(state, e), None)
}

fn store_failed(state: ConfigReconcileState, request: String, e: StoreError) -> Step {
    (error_state(state, Error::StoreRequestFailed(request, e)), None)
}

fn unexpected_response(state: ConfigReconcileState, step: &'static str) -> Step {
    (error_state(state, Error::UnexpectedResponse(step)), None)
}

fn done_state(state: ConfigReconcileState, outcome: ReconcileOutcome) -> ConfigReconcileState {
    ConfigReconcileState {
        reconcile_step: ConfigReconcileStep::Done(outcome),
        ..state
    }
}

fn error_state(state: ConfigReconcileState, e: Error) -> ConfigReconcileState {
    ConfigReconcileState {
        reconcile_step: ConfigReconcileStep::Error(e),
        ..state
    }
}
