// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::annotations::*;
use crate::botblocker_types::*;
use crate::fan_out::*;
use crate::unit_tests::make_ingress;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::{reflector, watcher};
use kube::ResourceExt;

fn ingresses() -> Vec<Ingress> {
    vec![
        make_ingress("a", "follows-bots", &[(INGRESS_CONFIG_NAME_ANNOTATION, "bots")]),
        make_ingress("b", "follows-bots-too", &[(INGRESS_CONFIG_NAME_ANNOTATION, "bots")]),
        make_ingress("a", "follows-other", &[(INGRESS_CONFIG_NAME_ANNOTATION, "other")]),
        make_ingress("a", "detached", &[(INGRESS_CONFIG_SPEC_HASH_ANNOTATION, "h1")]),
        make_ingress("b", "detached-elsewhere", &[(INGRESS_CONFIG_SPEC_HASH_ANNOTATION, "h2")]),
        make_ingress("a", "plain", &[]),
    ]
}

#[test]
pub fn test_select_referencing_config() {
    let selected = select(ingresses(), &TargetSelector::ReferencingConfig("bots".to_string()));
    let names: Vec<String> = selected.iter().map(|ingress| ingress.name_any()).collect();
    assert_eq!(vec!["follows-bots", "follows-bots-too"], names);
}

#[test]
pub fn test_select_detached_with_fingerprint() {
    let selected = select(ingresses(), &TargetSelector::DetachedWithFingerprint("h1".to_string()));
    assert_eq!(1, selected.len());
    assert_eq!("detached", selected[0].name_any());
    assert!(select(ingresses(), &TargetSelector::DetachedWithFingerprint("h3".to_string())).is_empty());
}

#[test]
pub fn test_fan_out_from_reflector_cache() {
    let (reader, mut writer) = reflector::store::<Ingress>();
    writer.apply_watcher_event(&watcher::Event::Restarted(ingresses()));
    let index = FanOutIndex::new(reader);

    let config = IngressConfig::new("bots", IngressConfigSpec::default());
    let mut refs: Vec<String> = index
        .fan_out(&config)
        .into_iter()
        .map(|obj_ref| format!("{}/{}", obj_ref.namespace.unwrap_or_default(), obj_ref.name))
        .collect();
    refs.sort();
    assert_eq!(vec!["a/follows-bots", "b/follows-bots-too"], refs);

    let unknown = IngressConfig::new("unknown", IngressConfigSpec::default());
    assert!(index.fan_out(&unknown).is_empty());
}
