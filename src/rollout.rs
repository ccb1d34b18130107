// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

use crate::botblocker_types::*;
use crate::conditions::{find_status_condition, new_condition, set_status_condition};
use crate::fan_out::fingerprint_index;

pub const MESSAGE_IN_PROGRESS: &str = "Waiting for all Ingresses to be updated";
pub const MESSAGE_SUCCESSFUL: &str = "All Ingresses successfully reconciled";
pub const MESSAGE_READY: &str = "Ready for usage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutPhase {
    InProgress,
    Successful,
    /// No Ingress references the config.
    VacuouslyReady,
}

impl RolloutPhase {
    pub fn is_ready(&self) -> bool {
        !matches!(self, RolloutPhase::InProgress)
    }
}

/// Counts the referencing Ingresses and those already carrying `spec_hash`.
pub fn count(ingresses: &[Ingress], spec_hash: &str) -> RolloutCounts {
    let converged = ingresses
        .iter()
        .filter(|ingress| !spec_hash.is_empty() && fingerprint_index(ingress) == Some(spec_hash))
        .count();
    RolloutCounts {
        total: ingresses.len() as i32,
        converged: converged as i32,
    }
}

pub fn phase(counts: RolloutCounts) -> RolloutPhase {
    if counts.total == 0 {
        RolloutPhase::VacuouslyReady
    } else if counts.converged == counts.total {
        RolloutPhase::Successful
    } else {
        RolloutPhase::InProgress
    }
}

pub fn update_condition(phase: RolloutPhase, now: Time) -> Condition {
    match phase {
        RolloutPhase::InProgress => new_condition(
            CONDITION_TYPE_UPDATE_SUCCEEDED,
            false,
            CONDITION_REASON_IN_PROGRESS,
            MESSAGE_IN_PROGRESS,
            now,
        ),
        RolloutPhase::Successful => new_condition(
            CONDITION_TYPE_UPDATE_SUCCEEDED,
            true,
            CONDITION_REASON_SUCCESSFUL,
            MESSAGE_SUCCESSFUL,
            now,
        ),
        RolloutPhase::VacuouslyReady => new_condition(
            CONDITION_TYPE_UPDATE_SUCCEEDED,
            true,
            CONDITION_REASON_READY,
            MESSAGE_READY,
            now,
        ),
    }
}

/// Records the UpdateSucceeded condition and mirrors it into the printer-column
/// fields. `last_updated` follows the condition's transitions.
/// Returns whether the status changed.
pub fn record_update_condition(status: &mut IngressConfigStatus, condition: Condition) -> bool {
    let previous = find_status_condition(&status.conditions, CONDITION_TYPE_UPDATE_SUCCEEDED)
        .map(|c| c.status.clone());
    let flipped = previous.as_ref() != Some(&condition.status);
    let transition_time = condition.last_transition_time.clone();
    let message = condition.message.clone();
    let condition_status = condition.status.clone();

    let mut changed = set_status_condition(&mut status.conditions, condition);
    if flipped {
        status.last_updated = Some(transition_time);
        changed = true;
    }
    if status.last_condition_status.as_ref() != Some(&condition_status) {
        status.last_condition_status = Some(condition_status);
        changed = true;
    }
    if status.last_condition_message.as_ref() != Some(&message) {
        status.last_condition_message = Some(message);
        changed = true;
    }
    changed
}
