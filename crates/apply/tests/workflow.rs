#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use reconkit_apply::{Reconciler, ReportRow, ResourceState, Resources, StepOutcome};
use reconkit_core::{Backoff, Document, Error, PropagationPolicy, ResourceIdentity, ResourceType};
use reconkit_kubehub::{cancel_after, MemoryTransport, Op, Transport};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), "demo".to_string())])
}

fn typed_deployment(name: &str) -> Deployment {
    Deployment {
        metadata: ObjectMeta { name: Some(name.into()), labels: Some(labels()), ..Default::default() },
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            selector: LabelSelector { match_labels: Some(labels()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels()), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "web".into(),
                        image: Some("api-server:latest".into()),
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

fn dynamic_deployment(name: &str) -> Document {
    Document::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "labels": { "app": "demo" } },
        "spec": {
            "replicas": 2,
            "selector": { "matchLabels": { "app": "demo" } },
            "template": {
                "metadata": { "labels": { "app": "demo" } },
                "spec": {
                    "containers": [{
                        "name": "web",
                        "image": "api-server:latest",
                        "ports": [{ "name": "http", "protocol": "TCP", "containerPort": 80 }]
                    }]
                }
            }
        }
    }))
    .expect("deployment document")
}

fn typed_service(name: &str) -> Service {
    Service {
        metadata: ObjectMeta { name: Some(name.into()), labels: Some(labels()), ..Default::default() },
        spec: Some(ServiceSpec {
            selector: Some(labels()),
            ports: Some(vec![ServicePort { name: Some("http".into()), port: 80, ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn image_of(doc: &Document) -> Option<String> {
    let containers = doc.get_slice(&["spec", "template", "spec", "containers"]).ok()??;
    containers.first()?.get("image")?.as_str().map(str::to_string)
}

#[tokio::test]
async fn typed_deployment_lifecycle() {
    let mem = Arc::new(MemoryTransport::new());
    let mut rec = Reconciler::new(mem.clone()).with_backoff(Backoff::immediate(10));
    let id = ResourceIdentity::of::<Deployment>("default", "demo");
    let token = CancellationToken::new();
    let deployments: Resources<Deployment> = Resources::typed(mem.clone(), "default");

    assert_eq!(rec.ensure_created(&id, &typed_deployment("demo")).await.expect("create"), StepOutcome::Created);
    let fetched = deployments.get("demo", &token).await.expect("get");
    assert_eq!(fetched.spec.as_ref().and_then(|s| s.replicas), Some(2));

    let outcome = rec
        .ensure_updated(&id, |d: &mut Deployment| {
            let spec = d.spec.get_or_insert_with(Default::default);
            spec.replicas = Some(1);
            if let Some(pod) = spec.template.spec.as_mut() {
                pod.containers[0].image = Some("nginx:1.13".into());
            }
            Ok(())
        })
        .await
        .expect("update");
    assert_eq!(outcome, StepOutcome::Updated { attempts: 1 });

    let rows = rec
        .list_and_report(id.resource_type(), "default", None, &["spec", "replicas"])
        .await
        .expect("list");
    assert_eq!(rows, vec![ReportRow { name: "demo".into(), observed: Some(json!(1)) }]);
    let listed = deployments.list(None, &token).await.expect("typed list");
    let image = listed[0].spec.as_ref().and_then(|s| s.template.spec.as_ref()).and_then(|p| p.containers[0].image.clone());
    assert_eq!(image.as_deref(), Some("nginx:1.13"));

    assert_eq!(rec.ensure_deleted(&id, PropagationPolicy::Foreground).await.expect("delete"), StepOutcome::Deleted);
    assert!(deployments.get("demo", &token).await.unwrap_err().is_not_found());
    assert_eq!(mem.deletions(), vec![(id.clone(), PropagationPolicy::Foreground)]);
    assert_eq!(rec.state(&id), ResourceState::Absent);
}

#[tokio::test]
async fn dynamic_deployment_lifecycle() {
    let mem = Arc::new(MemoryTransport::new());
    let mut rec = Reconciler::new(mem.clone()).with_backoff(Backoff::immediate(10));
    let ty = ResourceType::new("apps", "v1", "Deployment");
    let id = ty.identity("default", "demo");
    let token = CancellationToken::new();

    rec.ensure_created(&id, &dynamic_deployment("demo")).await.expect("create");
    let fetched = mem.get(&id, &token).await.expect("get");
    assert_eq!(fetched.get_i64(&["spec", "replicas"]).expect("walk"), Some(2));

    mem.fail_next_updates_with_conflict(2);
    let outcome = rec
        .ensure_updated(&id, |d: &mut Document| {
            d.set(&["spec", "replicas"], 1)?;
            if let Some(containers) = d.get_mut(&["spec", "template", "spec", "containers"])?.and_then(|v| v.as_array_mut()) {
                containers[0]["image"] = json!("nginx:1.13");
            }
            Ok(())
        })
        .await
        .expect("update");
    assert_eq!(outcome, StepOutcome::Updated { attempts: 3 });
    assert_eq!(mem.calls(Op::Get), 4);
    assert_eq!(mem.calls(Op::Update), 3);

    let rows = rec.list_and_report(&ty, "default", Some("app=demo"), &["spec", "replicas"]).await.expect("list");
    assert_eq!(rows, vec![ReportRow { name: "demo".into(), observed: Some(json!(1)) }]);
    assert_eq!(image_of(&mem.get(&id, &token).await.expect("get")).as_deref(), Some("nginx:1.13"));

    rec.ensure_deleted(&id, PropagationPolicy::Foreground).await.expect("delete");
    assert!(mem.get(&id, &token).await.unwrap_err().is_not_found());
    assert_eq!(rec.ensure_deleted(&id, PropagationPolicy::Foreground).await.expect("again"), StepOutcome::AlreadyAbsent);
}

#[tokio::test]
async fn server_defaults_are_visible_to_later_steps() {
    let mem = Arc::new(MemoryTransport::new());
    let mut rec = Reconciler::new(mem.clone());
    let ty = ResourceType::new("apps", "v1", "Deployment");
    let id = ty.identity("default", "bare");
    let mut desired = dynamic_deployment("bare");
    desired.remove(&["spec", "replicas"]).expect("remove");
    rec.ensure_created(&id, &desired).await.expect("create");
    let rows = rec.list_and_report(&ty, "default", None, &["spec", "replicas"]).await.expect("list");
    assert_eq!(rows[0].observed, Some(json!(1)));
}

#[tokio::test]
async fn concurrent_workflows_share_one_transport() {
    let mem = Arc::new(MemoryTransport::new());
    mem.set_latency(Duration::from_millis(2));
    let transport: Arc<dyn Transport> = mem.clone();
    let token = CancellationToken::new();

    let deploy_flow = async {
        let mut rec = Reconciler::new(transport.clone()).with_cancel(token.clone());
        let id = ResourceIdentity::of::<Deployment>("default", "demo");
        rec.ensure_created(&id, &typed_deployment("demo")).await?;
        rec.ensure_updated(&id, |d: &mut Deployment| {
            d.spec.get_or_insert_with(Default::default).replicas = Some(3);
            Ok(())
        })
        .await?;
        rec.ensure_deleted(&id, PropagationPolicy::Foreground).await
    };
    let service_flow = async {
        let mut rec = Reconciler::new(transport.clone()).with_cancel(token.clone());
        let id = ResourceIdentity::of::<Service>("default", "demo");
        rec.ensure_created(&id, &typed_service("demo")).await?;
        rec.list_and_report(id.resource_type(), "default", Some("app=demo"), &["spec", "ports"]).await?;
        rec.ensure_deleted(&id, PropagationPolicy::Background).await
    };

    let (d, s) = tokio::join!(deploy_flow, service_flow);
    assert_eq!(d.expect("deployment workflow"), StepOutcome::Deleted);
    assert_eq!(s.expect("service workflow"), StepOutcome::Deleted);
    assert!(mem.is_empty());
}

#[tokio::test]
async fn one_failed_workflow_does_not_stop_the_other() {
    let mem = Arc::new(MemoryTransport::new());
    mem.fail_next_updates_with_conflict(u32::MAX);
    let transport: Arc<dyn Transport> = mem.clone();

    let deploy_flow = async {
        let mut rec = Reconciler::new(transport.clone()).with_backoff(Backoff::immediate(3));
        let id = ResourceIdentity::of::<Deployment>("default", "demo");
        rec.ensure_created(&id, &typed_deployment("demo")).await?;
        rec.ensure_updated(&id, |d: &mut Deployment| {
            d.spec.get_or_insert_with(Default::default).replicas = Some(1);
            Ok(())
        })
        .await
    };
    let service_flow = async {
        let mut rec = Reconciler::new(transport.clone());
        let id = ResourceIdentity::of::<Service>("default", "demo");
        rec.ensure_created(&id, &typed_service("demo")).await?;
        rec.ensure_deleted(&id, PropagationPolicy::Background).await
    };

    let (d, s) = tokio::join!(deploy_flow, service_flow);
    let err = d.unwrap_err();
    assert_eq!(err.operation, Op::Update);
    assert!(matches!(err.source, Error::RetryExhausted { attempts: 3, .. }), "{err}");
    assert_eq!(err.to_string(), "update apps/v1/deployments default/demo failed");
    assert_eq!(err.source.to_string(), "gave up after 3 conflicting attempts");
    assert_eq!(s.expect("service workflow"), StepOutcome::Deleted);
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_slow_calls() {
    let mem = Arc::new(MemoryTransport::new());
    mem.set_latency(Duration::from_secs(30));
    let token = CancellationToken::new();
    let mut rec = Reconciler::new(mem.clone()).with_cancel(token.clone());
    let _timer = cancel_after(&token, Duration::from_millis(100));

    let started = tokio::time::Instant::now();
    let err = rec
        .ensure_created(&ResourceIdentity::of::<Deployment>("default", "demo"), &typed_deployment("demo"))
        .await
        .unwrap_err();
    assert!(err.source.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(mem.is_empty());
}
