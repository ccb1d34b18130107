// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! The shim layer connects the reconciler state machines to kube-rs.
//!
//! kube-rs calls `reconcile_config`/`reconcile_target` whenever a trigger fires;
//! both drive the corresponding state machine through `reconcile_with`, which
//! executes each request the machine yields against the object store.
pub mod controller_runtime;

use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
    Resource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

use crate::botblocker_types::IngressConfig;
use crate::config::OperatorEnv;
use crate::reconciler::{ReconcileOutcome, ReconcileTarget, Reconciler};
use crate::store::{ObjectKey, ObjectStore};
use crate::Error;

/// Data is passed to every reconcile. It carries the store requests are sent to.
pub struct Data {
    pub store: Arc<dyn ObjectStore>,
    pub env: OperatorEnv,
}

// reconcile_with starts from reconcile_init_state and feeds reconcile_core the
// response to its previous request, until reconcile_done or reconcile_error.
pub async fn reconcile_with<R>(
    reconciler: &R,
    key: &ObjectKey,
    store: &dyn ObjectStore,
) -> Result<ReconcileOutcome, Error>
where
    R: Reconciler + Sync,
{
    let log_header = format!("Reconciling {}/{}:", R::KIND, key);
    let mut state = reconciler.reconcile_init_state();
    let mut resp_o = None;
    loop {
        if let Some(outcome) = reconciler.reconcile_done(&state) {
            debug!("{} done with {:?}", log_header, outcome);
            return Ok(outcome);
        }
        if let Some(e) = reconciler.reconcile_error(&state) {
            warn!("{} error: {}", log_header, e);
            return Err(e);
        }
        let (state_prime, request_o) = reconciler.reconcile_core(key, resp_o, state);
        state = state_prime;
        resp_o = match request_o {
            Some(request) => {
                debug!("{} sending {}", log_header, request.key());
                Some(store.execute(request).await)
            }
            None => None,
        };
    }
}

pub async fn reconcile_config(config: Arc<IngressConfig>, ctx: Arc<Data>) -> Result<Action, Error> {
    let key = ObjectKey::from_resource(config.as_ref())?;
    let outcome = ReconcileTarget::Config(key)
        .reconcile(ctx.store.as_ref(), &ctx.env)
        .await?;
    Ok(outcome.into())
}

pub async fn reconcile_target(ingress: Arc<Ingress>, ctx: Arc<Data>) -> Result<Action, Error> {
    let key = ObjectKey::from_resource(ingress.as_ref())?;
    let outcome = ReconcileTarget::Ingress(key)
        .reconcile(ctx.store.as_ref(), &ctx.env)
        .await?;
    Ok(outcome.into())
}

// error_policy defines the controller's behavior when the reconcile ends with an error.
pub fn error_policy<K>(_object: Arc<K>, error: &Error, _ctx: Arc<Data>) -> Action {
    if error.is_terminal() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(10))
    }
}

pub fn report_controller_reconciled<K, QueueErr>(
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<Error, QueueErr>>,
) where
    K: Resource,
    QueueErr: std::error::Error,
{
    match result {
        Ok((obj, _)) => {
            info!(
                controller.name = controller_name,
                object = %obj,
                "Reconciled object"
            );
        }
        Err(err) => {
            error!(
                controller.name = controller_name,
                error = err as &dyn std::error::Error,
                "Failed to reconcile object",
            );
        }
    }
}
