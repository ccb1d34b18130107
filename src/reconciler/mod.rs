// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod config_reconciler;
pub mod target_reconciler;

use kube::runtime::controller::Action;
use std::time::Duration;

use crate::config::OperatorEnv;
use crate::shim_layer::reconcile_with;
use crate::store::{ObjectKey, ObjectStore, StoreRequest, StoreResponse};
use crate::Error;

pub use config_reconciler::ConfigReconciler;
pub use target_reconciler::TargetReconciler;

/// A reconciler is a state machine stepped by the shim layer. Each call to
/// `reconcile_core` consumes the response to the previous request and yields
/// the next request, until the state is done or failed.
pub trait Reconciler {
    type T: Send;

    const KIND: &'static str;

    fn reconcile_init_state(&self) -> Self::T;

    fn reconcile_core(
        &self,
        key: &ObjectKey,
        resp_o: Option<StoreResponse>,
        state: Self::T,
    ) -> (Self::T, Option<StoreRequest>);

    fn reconcile_done(&self, state: &Self::T) -> Option<ReconcileOutcome>;

    fn reconcile_error(&self, state: &Self::T) -> Option<Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change notification.
    Done,
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    pub fn requeue_now() -> Self {
        ReconcileOutcome::RequeueAfter(Duration::ZERO)
    }
}

impl From<ReconcileOutcome> for Action {
    fn from(outcome: ReconcileOutcome) -> Action {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// One reconcile request, tagged by the kind of object it is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReconcileTarget {
    Config(ObjectKey),
    Ingress(ObjectKey),
}

impl ReconcileTarget {
    pub async fn reconcile(
        &self,
        store: &dyn ObjectStore,
        env: &OperatorEnv,
    ) -> Result<ReconcileOutcome, Error> {
        match self {
            ReconcileTarget::Config(key) => {
                reconcile_with(&ConfigReconciler::new(env), key, store).await
            }
            ReconcileTarget::Ingress(key) => {
                reconcile_with(&TargetReconciler::new(env), key, store).await
            }
        }
    }
}
