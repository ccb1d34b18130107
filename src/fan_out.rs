// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Reverse lookup from an IngressConfig name to the Ingresses that follow it.
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use std::sync::Arc;

use crate::annotations::{ingress_config_name, local_spec_hash};
use crate::botblocker_types::IngressConfig;

/// Index extractor: the IngressConfig an Ingress references.
pub fn reference_index(ingress: &Ingress) -> Option<&str> {
    ingress_config_name(&ingress.metadata)
}

/// Index extractor: the spec hash an Ingress was last synchronized to.
pub fn fingerprint_index(ingress: &Ingress) -> Option<&str> {
    local_spec_hash(&ingress.metadata)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Ingresses whose reference annotation names this IngressConfig.
    ReferencingConfig(String),
    /// Ingresses that lost their reference but still carry the given spec hash,
    /// i.e. a detach from that config that has not been reconciled yet.
    DetachedWithFingerprint(String),
}

impl TargetSelector {
    pub fn matches(&self, ingress: &Ingress) -> bool {
        match self {
            TargetSelector::ReferencingConfig(name) => reference_index(ingress) == Some(name.as_str()),
            TargetSelector::DetachedWithFingerprint(spec_hash) => {
                reference_index(ingress).is_none() && fingerprint_index(ingress) == Some(spec_hash.as_str())
            }
        }
    }
}

impl std::fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetSelector::ReferencingConfig(name) => write!(f, "ingressConfigName={}", name),
            TargetSelector::DetachedWithFingerprint(spec_hash) => {
                write!(f, "ingressConfigName=&ingressConfigSpecHash={}", spec_hash)
            }
        }
    }
}

pub fn select<I>(ingresses: I, selector: &TargetSelector) -> Vec<Ingress>
where
    I: IntoIterator<Item = Ingress>,
{
    ingresses
        .into_iter()
        .filter(|ingress| selector.matches(ingress))
        .collect()
}

/// Fan-out index served from the Ingress reflector cache.
#[derive(Clone)]
pub struct FanOutIndex {
    reader: Store<Ingress>,
}

impl FanOutIndex {
    pub fn new(reader: Store<Ingress>) -> Self {
        FanOutIndex { reader }
    }

    pub fn lookup(&self, selector: &TargetSelector) -> Vec<Arc<Ingress>> {
        self.reader
            .state()
            .into_iter()
            .filter(|ingress| selector.matches(ingress))
            .collect()
    }

    /// Requests for every Ingress following `config`.
    pub fn fan_out(&self, config: &IngressConfig) -> Vec<ObjectRef<Ingress>> {
        let selector = TargetSelector::ReferencingConfig(config.name_any());
        self.lookup(&selector)
            .iter()
            .map(|ingress| ObjectRef::from_obj(ingress.as_ref()))
            .collect()
    }
}
