// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::*;
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    env: OperatorEnv,
}

#[test]
pub fn test_parse_defaults() {
    let cli = TestCli::try_parse_from(["test", "--operator-namespace", "botblocker"]).unwrap();
    assert_eq!(OperatorEnv::new("botblocker"), cli.env);
    assert_eq!(Duration::from_secs(10), cli.env.rollout_poll_interval());
    assert_eq!(Duration::from_secs(300), cli.env.resync_interval());
}

#[test]
pub fn test_parse_current_namespace_only() {
    let cli = TestCli::try_parse_from([
        "test",
        "--operator-namespace",
        "botblocker",
        "--current-namespace-only",
        "true",
    ])
    .unwrap();
    assert!(cli.env.current_namespace_only);
    assert_eq!(Some("botblocker"), cli.env.target_namespace());
    assert!(cli.env.manages_namespace("botblocker"));
    assert!(!cli.env.manages_namespace("default"));
}

#[test]
pub fn test_all_namespaces_managed_by_default() {
    let env = OperatorEnv::new("botblocker");
    assert_eq!(None, env.target_namespace());
    assert!(env.manages_namespace("default"));
}
