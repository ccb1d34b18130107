// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use clap::{ArgAction, Args};
use std::time::Duration;

/// Process settings, read from flags or the environment.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct OperatorEnv {
    /// Namespace holding the IngressConfig objects.
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    pub operator_namespace: String,

    /// Only manage Ingresses living in the operator namespace.
    #[arg(long, env = "CURRENT_NAMESPACE_ONLY", default_value_t = false, action = ArgAction::Set)]
    pub current_namespace_only: bool,

    /// Delay between convergence checks while a rollout is in progress.
    #[arg(long, env = "ROLLOUT_POLL_SECONDS", default_value_t = 10)]
    pub rollout_poll_seconds: u64,

    /// Delay between convergence checks once a rollout has finished.
    #[arg(long, env = "RESYNC_SECONDS", default_value_t = 300)]
    pub resync_seconds: u64,
}

impl OperatorEnv {
    pub fn new(operator_namespace: &str) -> Self {
        OperatorEnv {
            operator_namespace: operator_namespace.to_string(),
            current_namespace_only: false,
            rollout_poll_seconds: 10,
            resync_seconds: 300,
        }
    }

    /// Namespace the Ingress watch is restricted to, if any.
    pub fn target_namespace(&self) -> Option<&str> {
        if self.current_namespace_only {
            Some(&self.operator_namespace)
        } else {
            None
        }
    }

    pub fn manages_namespace(&self, namespace: &str) -> bool {
        self.target_namespace().map_or(true, |ns| ns == namespace)
    }

    pub fn rollout_poll_interval(&self) -> Duration {
        Duration::from_secs(self.rollout_poll_seconds)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }
}
