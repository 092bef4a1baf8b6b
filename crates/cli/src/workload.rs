//! Demo workloads, built once as typed k8s-openapi values and once as schema-less documents.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use reconkit_core::{Document, Result};
use serde_json::json;

pub const UPDATED_REPLICAS: i32 = 1;
pub const INITIAL_REPLICAS: i32 = 2;

fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

pub fn typed_deployment(name: &str, image: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta { name: Some(name.into()), labels: Some(app_labels(name)), ..Default::default() },
        spec: Some(DeploymentSpec {
            replicas: Some(INITIAL_REPLICAS),
            selector: LabelSelector { match_labels: Some(app_labels(name)), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(app_labels(name)), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "web".into(),
                        image: Some(image.into()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".into()),
                            protocol: Some("TCP".into()),
                            container_port: 80,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn dynamic_deployment(name: &str, image: &str) -> Result<Document> {
    Document::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "labels": { "app": name } },
        "spec": {
            "replicas": INITIAL_REPLICAS,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": {
                    "containers": [{
                        "name": "web",
                        "image": image,
                        "ports": [{ "name": "http", "protocol": "TCP", "containerPort": 80 }]
                    }]
                }
            }
        }
    }))
}

pub fn typed_service(name: &str) -> Service {
    Service {
        metadata: ObjectMeta { name: Some(format!("{name}-service")), labels: Some(app_labels(name)), ..Default::default() },
        spec: Some(ServiceSpec {
            selector: Some(app_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                protocol: Some("TCP".into()),
                port: 80,
                target_port: Some(IntOrString::Int(80)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn dynamic_service(name: &str) -> Result<Document> {
    Document::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": format!("{name}-service"), "labels": { "app": name } },
        "spec": {
            "selector": { "app": name },
            "ports": [{ "name": "http", "protocol": "TCP", "port": 80, "targetPort": 80 }]
        }
    }))
}

/// Scale down and roll the first container to `image`.
pub fn retarget_typed(d: &mut Deployment, image: &str) -> Result<()> {
    let spec = d.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(UPDATED_REPLICAS);
    if let Some(container) = spec.template.spec.as_mut().and_then(|p| p.containers.first_mut()) {
        container.image = Some(image.into());
    }
    Ok(())
}

/// Schema-less twin of [`retarget_typed`].
pub fn retarget_dynamic(d: &mut Document, image: &str) -> Result<()> {
    d.set(&["spec", "replicas"], UPDATED_REPLICAS)?;
    let first = d
        .get_mut(&["spec", "template", "spec", "containers"])?
        .and_then(|v| v.as_array_mut())
        .and_then(|containers| containers.first_mut())
        .and_then(|c| c.as_object_mut());
    if let Some(container) = first {
        container.insert("image".into(), json!(image));
    }
    Ok(())
}
