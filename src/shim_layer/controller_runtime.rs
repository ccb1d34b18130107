// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::Api,
    runtime::{
        controller::Controller,
        reflector::{self, reflector},
        watcher::{self, watcher},
    },
    Client,
};
use std::sync::Arc;
use tracing::*;

use crate::botblocker_types::IngressConfig;
use crate::config::OperatorEnv;
use crate::fan_out::FanOutIndex;
use crate::predicates::{config_predicate, gate, ingress_predicate};
use crate::shim_layer::*;
use crate::store::{KubeStore, ObjectStore};

/// Runs the Ingress and IngressConfig controllers until a shutdown signal arrives.
///
/// The Ingress controller is triggered by gated Ingress events, and by gated
/// IngressConfig events mapped to the referencing Ingresses through the
/// reflector-backed fan-out index.
pub async fn run_controllers(env: OperatorEnv) -> Result<()> {
    let client = Client::try_default().await?;
    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone(), &env));
    let data = Arc::new(Data {
        store,
        env: env.clone(),
    });

    let config_api = Api::<IngressConfig>::namespaced(client.clone(), &env.operator_namespace);
    let ingress_api = match env.target_namespace() {
        Some(namespace) => Api::<Ingress>::namespaced(client.clone(), namespace),
        None => Api::<Ingress>::all(client.clone()),
    };
    info!(
        operator_namespace = %env.operator_namespace,
        current_namespace_only = env.current_namespace_only,
        "starting controllers"
    );

    let (reader, writer) = reflector::store::<Ingress>();
    let index = FanOutIndex::new(reader.clone());
    let ingress_events = reflector(writer, watcher(ingress_api, watcher::Config::default()));
    let ingress_trigger = gate(ingress_events, ingress_predicate);
    let config_trigger = gate(
        watcher(config_api.clone(), watcher::Config::default()),
        config_predicate,
    );

    let ingress_reconciler = Controller::for_stream(ingress_trigger, reader)
        .watches_stream(config_trigger, move |config: IngressConfig| index.fan_out(&config))
        .shutdown_on_signal()
        .run(reconcile_target, error_policy, data.clone())
        .map(|res| report_controller_reconciled("ingress-reconciler", &res));
    let config_reconciler = Controller::new(config_api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_config, error_policy, data)
        .map(|res| report_controller_reconciled("ingress-config-reconciler", &res));

    futures::stream::select(ingress_reconciler, config_reconciler)
        .collect::<()>()
        .await;
    info!("controllers terminated");
    Ok(())
}
