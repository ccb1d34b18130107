// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod annotations;
pub mod botblocker_types;
pub mod conditions;
pub mod config;
pub mod fan_out;
pub mod predicates;
pub mod reconciler;
pub mod rollout;
pub mod shim_layer;
pub mod snippet;
pub mod spec_hash;
pub mod store;
#[cfg(test)]
pub mod unit_tests;

use crate::snippet::MergeError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("Failed to hash IngressConfig spec: {0}")]
    HashComputeFailed(String),
    #[error("Store request {0} failed: {1}")]
    StoreRequestFailed(String, #[source] StoreError),
    #[error("Unexpected store response at step {0}")]
    UnexpectedResponse(&'static str),
}

impl Error {
    /// Terminal errors need an operator to repair the object by hand,
    /// so the controller does not requeue them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::Merge(_))
    }
}
