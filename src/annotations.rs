// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

/// Set by users on an Ingress to opt into an IngressConfig (by name, in the operator namespace).
pub const INGRESS_CONFIG_NAME_ANNOTATION: &str = "kube-botblocker.github.io/ingressConfigName";
/// The nginx annotation the operator writes its block into. Owned by the user.
pub const INGRESS_SERVER_SNIPPET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/server-snippet";
/// The IngressConfig spec hash the Ingress was last synchronized to.
pub const INGRESS_CONFIG_SPEC_HASH_ANNOTATION: &str =
    "kube-botblocker.github.io/ingressConfigSpecHash";

pub const INGRESS_CONFIG_FINALIZER: &str = "kube-botblocker.github.io/finalizer";

/// Returns the annotation value, treating an empty value as absent.
pub fn non_empty_annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

pub fn ingress_config_name(meta: &ObjectMeta) -> Option<&str> {
    non_empty_annotation(meta, INGRESS_CONFIG_NAME_ANNOTATION)
}

pub fn local_spec_hash(meta: &ObjectMeta) -> Option<&str> {
    non_empty_annotation(meta, INGRESS_CONFIG_SPEC_HASH_ANNOTATION)
}

pub fn server_snippet(meta: &ObjectMeta) -> &str {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(INGRESS_SERVER_SNIPPET_ANNOTATION))
        .map(String::as_str)
        .unwrap_or("")
}

pub fn annotations_mut(meta: &mut ObjectMeta) -> &mut BTreeMap<String, String> {
    meta.annotations.get_or_insert_with(BTreeMap::new)
}

/// Writes the snippet back, dropping the annotation when nothing is left in it.
pub fn set_server_snippet(annotations: &mut BTreeMap<String, String>, snippet: String) {
    if snippet.is_empty() {
        annotations.remove(INGRESS_SERVER_SNIPPET_ANNOTATION);
    } else {
        annotations.insert(INGRESS_SERVER_SNIPPET_ANNOTATION.to_string(), snippet);
    }
}

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .map_or(false, |finalizers| finalizers.iter().any(|f| f == finalizer))
}

pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    if !has_finalizer(meta, finalizer) {
        meta.finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
    }
}

pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) {
    if let Some(finalizers) = meta.finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
}
