// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
//! Event predicates that decide which watch events reach the reconcilers.
use futures::{Stream, StreamExt};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::{reflector::ObjectRef, watcher};
use kube::Resource;
use std::collections::HashMap;
use std::hash::Hash;

use crate::annotations::ingress_config_name;
use crate::botblocker_types::*;
use crate::conditions::{is_status_condition_present_and_equal, CONDITION_FALSE};

/// A config is dispatched to its dependents while its rollout is in progress.
pub fn config_predicate(_old: Option<&IngressConfig>, new: &IngressConfig) -> bool {
    new.status.as_ref().map_or(false, |status| {
        is_status_condition_present_and_equal(&status.conditions, CONDITION_TYPE_UPDATE_SUCCEEDED, CONDITION_FALSE)
    })
}

/// An Ingress is dispatched if it references a config, or referenced one
/// before this update (so the detach gets reconciled).
pub fn ingress_predicate(old: Option<&Ingress>, new: &Ingress) -> bool {
    let references = |ingress: &Ingress| ingress_config_name(&ingress.metadata).is_some();
    match old {
        None => references(new),
        Some(old) => references(old) || references(new),
    }
}

/// Folds one watch event into `seen` and returns the objects the predicate
/// lets through. Deletions never pass.
pub fn observe<K, P>(seen: &mut HashMap<ObjectRef<K>, K>, event: watcher::Event<K>, predicate: &P) -> Vec<K>
where
    K: Resource + Clone,
    K::DynamicType: Default + Eq + Hash + Clone,
    P: Fn(Option<&K>, &K) -> bool,
{
    match event {
        watcher::Event::Applied(obj) => {
            let old = seen.insert(ObjectRef::from_obj(&obj), obj.clone());
            if predicate(old.as_ref(), &obj) {
                vec![obj]
            } else {
                Vec::new()
            }
        }
        watcher::Event::Deleted(obj) => {
            seen.remove(&ObjectRef::from_obj(&obj));
            Vec::new()
        }
        watcher::Event::Restarted(objs) => {
            let mut relisted = HashMap::new();
            let mut triggered = Vec::new();
            for obj in objs {
                let obj_ref = ObjectRef::from_obj(&obj);
                let old = seen.remove(&obj_ref);
                if predicate(old.as_ref(), &obj) {
                    triggered.push(obj.clone());
                }
                relisted.insert(obj_ref, obj);
            }
            *seen = relisted;
            triggered
        }
    }
}

/// Turns a watch event stream into a trigger stream for `Controller::for_stream`
/// and `Controller::watches_stream`. Watch errors are passed through.
pub fn gate<K, S, P>(events: S, predicate: P) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: Resource + Clone + Send + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
    P: Fn(Option<&K>, &K) -> bool + Send + 'static,
{
    let mut seen: HashMap<ObjectRef<K>, K> = HashMap::new();
    events.flat_map(move |event| {
        let triggered: Vec<Result<K, watcher::Error>> = match event {
            Ok(event) => observe(&mut seen, event, &predicate).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(triggered)
    })
}
