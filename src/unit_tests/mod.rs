pub mod config;
pub mod fan_out;
pub mod rollout;
pub mod scenarios;

use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ObjectMeta;

pub fn make_ingress(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        ..Ingress::default()
    }
}
