// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

pub fn condition_status(value: bool) -> String {
    if value { CONDITION_TRUE } else { CONDITION_FALSE }.to_string()
}

pub fn new_condition(type_: &str, status: bool, reason: &str, message: &str, now: Time) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: condition_status(status),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
        observed_generation: None,
    }
}

pub fn find_status_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|condition| condition.type_ == type_)
}

pub fn is_status_condition_present_and_equal(conditions: &[Condition], type_: &str, status: &str) -> bool {
    find_status_condition(conditions, type_).map_or(false, |condition| condition.status == status)
}

pub fn is_status_condition_true(conditions: &[Condition], type_: &str) -> bool {
    is_status_condition_present_and_equal(conditions, type_, CONDITION_TRUE)
}

/// Upserts the condition keyed by its type. The transition time of an existing
/// condition only moves when its status flips. Returns whether anything changed.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    match conditions.iter_mut().find(|condition| condition.type_ == new.type_) {
        None => {
            conditions.push(new);
            true
        }
        Some(existing) => {
            let mut changed = false;
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = new.last_transition_time;
                changed = true;
            }
            if existing.reason != new.reason {
                existing.reason = new.reason;
                changed = true;
            }
            if existing.message != new.message {
                existing.message = new.message;
                changed = true;
            }
            if existing.observed_generation != new.observed_generation {
                existing.observed_generation = new.observed_generation;
                changed = true;
            }
            changed
        }
    }
}
