// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use tracing::*;
use tracing_subscriber::EnvFilter;

use kube_botblocker::botblocker_types::IngressConfig;
use kube_botblocker::config::OperatorEnv;
use kube_botblocker::shim_layer::controller_runtime::run_controllers;

#[derive(Parser)]
#[command(name = "kube-botblocker", about = "Blocks user agents on nginx Ingresses")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the IngressConfig custom resource definition.
    Export,
    /// Run the controllers.
    Run(OperatorEnv),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Export => {
            info!("exporting custom resource definition");
            println!("{}", serde_yaml::to_string(&IngressConfig::crd())?);
        }
        Command::Run(env) => {
            info!("running kube-botblocker");
            run_controllers(env).await?;
        }
    }
    Ok(())
}
