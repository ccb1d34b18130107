// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::annotations::*;
use crate::botblocker_types::*;
use crate::rollout::*;
use crate::unit_tests::make_ingress;
use chrono::{TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

fn at(secs: i64) -> Time {
    Time(Utc.timestamp_opt(secs, 0).unwrap())
}

#[test]
pub fn test_count() {
    let ingresses = vec![
        make_ingress("a", "one", &[(INGRESS_CONFIG_SPEC_HASH_ANNOTATION, "h1")]),
        make_ingress("a", "two", &[(INGRESS_CONFIG_SPEC_HASH_ANNOTATION, "h0")]),
        make_ingress("b", "three", &[]),
    ];
    assert_eq!(RolloutCounts { total: 3, converged: 1 }, count(&ingresses, "h1"));
    assert_eq!(RolloutCounts { total: 3, converged: 0 }, count(&ingresses, ""));
}

#[test]
pub fn test_phase() {
    assert_eq!(RolloutPhase::VacuouslyReady, phase(RolloutCounts { total: 0, converged: 0 }));
    assert_eq!(RolloutPhase::InProgress, phase(RolloutCounts { total: 2, converged: 1 }));
    assert_eq!(RolloutPhase::Successful, phase(RolloutCounts { total: 2, converged: 2 }));
    assert!(RolloutPhase::VacuouslyReady.is_ready());
    assert!(!RolloutPhase::InProgress.is_ready());
}

#[test]
pub fn test_update_condition_messages() {
    let c = update_condition(RolloutPhase::InProgress, at(1));
    assert_eq!(("False", "InProgress", MESSAGE_IN_PROGRESS), (c.status.as_str(), c.reason.as_str(), c.message.as_str()));
    let c = update_condition(RolloutPhase::Successful, at(1));
    assert_eq!(("True", "Successful", MESSAGE_SUCCESSFUL), (c.status.as_str(), c.reason.as_str(), c.message.as_str()));
    let c = update_condition(RolloutPhase::VacuouslyReady, at(1));
    assert_eq!(("True", "Ready", "Ready for usage"), (c.status.as_str(), c.reason.as_str(), c.message.as_str()));
}

#[test]
pub fn test_record_update_condition_mirrors_and_stamps() {
    let mut status = IngressConfigStatus::default();
    assert!(record_update_condition(&mut status, update_condition(RolloutPhase::InProgress, at(1))));
    assert_eq!(Some(at(1)), status.last_updated);
    assert_eq!(Some("False".to_string()), status.last_condition_status);
    assert_eq!(Some(MESSAGE_IN_PROGRESS.to_string()), status.last_condition_message);

    // Same condition again: nothing moves.
    assert!(!record_update_condition(&mut status, update_condition(RolloutPhase::InProgress, at(2))));
    assert_eq!(Some(at(1)), status.last_updated);

    assert!(record_update_condition(&mut status, update_condition(RolloutPhase::Successful, at(3))));
    assert_eq!(Some(at(3)), status.last_updated);
    assert_eq!(Some("True".to_string()), status.last_condition_status);
    assert_eq!(1, status.conditions.len());
}
