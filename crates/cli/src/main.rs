use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Pod, Service};
use reconkit_apply::{Reconciler, StepGate};
use reconkit_core::{Backoff, Document, Error, PropagationPolicy, ResourceIdentity, ResourceType};
use reconkit_kubehub::{ConnectOptions, KubeTransport, MemoryTransport, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod gate;
mod workload;

#[derive(Parser, Debug)]
#[command(name = "reconctl", version, about = "Reconcile a demo deployment and service against a cluster")]
struct Cli {
    /// Path to a kubeconfig file (default: inferred from KUBECONFIG or ~/.kube/config, then in-cluster)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Kubeconfig context (default: current context)
    #[arg(long = "context")]
    context: Option<String>,

    /// Namespace the workloads live in
    #[arg(long = "namespace", env = "RECONKIT_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Payload representation used for desired state and transforms
    #[arg(long = "mode", value_enum, default_value_t = Mode::Typed)]
    mode: Mode,

    /// Control plane to talk to
    #[arg(long = "backend", value_enum, default_value_t = Backend::Kube)]
    backend: Backend,

    /// Deployment name; the service is named `<name>-service`
    #[arg(long = "name", default_value = "demo")]
    name: String,

    /// Container image to create the deployment with
    #[arg(long = "image", default_value = "api-server:latest")]
    image: String,

    /// Container image the update step rolls to
    #[arg(long = "update-image", default_value = "nginx:1.13")]
    update_image: String,

    /// Wait for Enter before every step
    #[arg(long = "pause", action = ArgAction::SetTrue)]
    pause: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Mode {
    Typed,
    Dynamic,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Kube,
    Memory,
}

fn init_tracing() {
    let env = std::env::var("RECONKIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("RECONKIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid RECONKIT_METRICS_ADDR; expected host:port");
        }
    }
}

async fn connect(cli: &Cli) -> reconkit_core::Result<Arc<dyn Transport>> {
    match cli.backend {
        Backend::Kube => {
            let opts = ConnectOptions { kubeconfig: cli.config.clone(), context: cli.context.clone() };
            Ok(Arc::new(KubeTransport::connect(&opts).await?))
        }
        Backend::Memory => {
            info!("using in-memory control plane");
            Ok(Arc::new(MemoryTransport::new()))
        }
    }
}

/// Everything a workflow needs besides its own reconciler.
struct Workflow<'a> {
    cli: &'a Cli,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    gate: Option<Arc<dyn StepGate>>,
}

impl Workflow<'_> {
    fn reconciler(&self) -> Reconciler {
        let rec = Reconciler::new(self.transport.clone())
            .with_backoff(Backoff::from_env())
            .with_cancel(self.cancel.clone());
        match &self.gate {
            Some(gate) => rec.with_gate(gate.clone()),
            None => rec,
        }
    }

    async fn deployment(&self) -> Result<()> {
        let cli = self.cli;
        let mut rec = self.reconciler();
        let id = ResourceIdentity::of::<Deployment>(cli.namespace.as_str(), cli.name.as_str());

        match cli.mode {
            Mode::Typed => rec.ensure_created(&id, &workload::typed_deployment(&cli.name, &cli.image)).await?,
            Mode::Dynamic => rec.ensure_created(&id, &workload::dynamic_deployment(&cli.name, &cli.image)?).await?,
        };
        let current = self.transport.get(&id, &self.cancel).await.with_context(|| format!("reading back {id}"))?;
        let replicas = current.get_i64(&["spec", "replicas"])?.unwrap_or_default();
        println!("Created deployment {} with {} replicas", cli.name, replicas);

        let pods = self.pods(&mut rec).await?;
        println!("Pods from {} namespace: {}", cli.namespace, pods.len());
        for line in pods {
            println!("{line}");
        }

        let image = cli.update_image.as_str();
        let outcome = match cli.mode {
            Mode::Typed => rec.ensure_updated(&id, |d: &mut Deployment| workload::retarget_typed(d, image)).await?,
            Mode::Dynamic => rec.ensure_updated(&id, |d: &mut Document| workload::retarget_dynamic(d, image)).await?,
        };
        println!("Updated deployment {} ({})", cli.name, outcome);

        let rows = rec.list_and_report(id.resource_type(), &cli.namespace, None, &["spec", "replicas"]).await?;
        for row in rows {
            match row.observed.as_ref().and_then(|v| v.as_i64()) {
                Some(n) => println!("Deployment Name: {} and have {} replicas", row.name, n),
                None => println!("Deployment Name: {} (replicas not reported)", row.name),
            }
        }

        let outcome = rec.ensure_deleted(&id, PropagationPolicy::Foreground).await?;
        println!("Deployment {} {}", cli.name, outcome);
        Ok(())
    }

    /// One line per pod selected by the deployment's `app` label, with its phase.
    async fn pods(&self, rec: &mut Reconciler) -> Result<Vec<String>> {
        let selector = format!("app={}", self.cli.name);
        let rows = rec
            .list_and_report(&ResourceType::of::<Pod>(), &self.cli.namespace, Some(&selector), &["status", "phase"])
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| match row.observed.as_ref().and_then(|v| v.as_str()) {
                Some(phase) => format!("Pod Name: {} phase {}", row.name, phase),
                None => format!("Pod Name: {} phase unknown", row.name),
            })
            .collect())
    }

    async fn service(&self) -> Result<()> {
        let cli = self.cli;
        let mut rec = self.reconciler();
        let name = format!("{}-service", cli.name);
        let id = ResourceIdentity::of::<Service>(cli.namespace.as_str(), name.as_str());

        let outcome = match cli.mode {
            Mode::Typed => rec.ensure_created(&id, &workload::typed_service(&cli.name)).await?,
            Mode::Dynamic => rec.ensure_created(&id, &workload::dynamic_service(&cli.name)?).await?,
        };
        println!("Service {} {}", name, outcome);

        let selector = format!("app={}", cli.name);
        let rows = rec.list_and_report(id.resource_type(), &cli.namespace, Some(&selector), &["spec", "ports"]).await?;
        for row in rows {
            let ports = row.observed.as_ref().and_then(|v| v.as_array()).map(|p| p.len()).unwrap_or_default();
            println!("Service Name: {} exposes {} ports", row.name, ports);
        }

        let outcome = rec.ensure_deleted(&id, PropagationPolicy::Background).await?;
        println!("Service {} {}", name, outcome);
        Ok(())
    }
}

fn report(workflow: &str, res: &Result<()>) -> bool {
    match res {
        Ok(()) => {
            info!(workflow, "workflow finished");
            true
        }
        Err(e) => {
            error!(workflow, error = %e, "workflow failed");
            eprintln!("{workflow} workflow failed: {e:#}");
            false
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // A pending stdin read must not hold the process open after cancellation.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> ExitCode {
    init_metrics();
    let transport = match connect(&cli).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "cannot reach a control plane");
            eprintln!("configuration error: {e}");
            return match e {
                Error::Configuration(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            };
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        });
    }

    let gate: Option<Arc<dyn StepGate>> = if cli.pause { Some(Arc::new(gate::StdinGate::new(cancel.clone()))) } else { None };
    let workflow = Workflow { cli: &cli, transport, cancel, gate };
    info!(namespace = %cli.namespace, mode = ?cli.mode, backend = ?cli.backend, "starting workflows");

    let (deployment, service) = tokio::join!(workflow.deployment(), workflow.service());
    let ok = report("deployment", &deployment) & report("service", &service);
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_cli(extra: &[&str]) -> Cli {
        let mut args = vec!["reconctl", "--backend", "memory", "--namespace", "test"];
        args.extend_from_slice(extra);
        Cli::parse_from(args)
    }

    fn workflow(cli: &Cli) -> Workflow<'_> {
        workflow_over(cli, Arc::new(MemoryTransport::new()))
    }

    fn workflow_over(cli: &Cli, transport: Arc<dyn Transport>) -> Workflow<'_> {
        Workflow { cli, transport, cancel: CancellationToken::new(), gate: None }
    }

    #[test]
    fn defaults_describe_the_demo() {
        let cli = Cli::parse_from(["reconctl", "--config", "/tmp/kubeconfig"]);
        assert_eq!(cli.mode, Mode::Typed);
        assert_eq!(cli.backend, Backend::Kube);
        assert_eq!(cli.name, "demo");
        assert_eq!(cli.image, "api-server:latest");
        assert_eq!(cli.update_image, "nginx:1.13");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/kubeconfig")));
        assert!(!cli.pause);
    }

    #[tokio::test]
    async fn typed_workflows_run_against_memory_backend() {
        let cli = memory_cli(&["--mode", "typed"]);
        let wf = workflow(&cli);
        let (d, s) = tokio::join!(wf.deployment(), wf.service());
        d.expect("deployment workflow");
        s.expect("service workflow");
    }

    #[tokio::test]
    async fn dynamic_workflows_run_against_memory_backend() {
        let cli = memory_cli(&["--mode", "dynamic", "--name", "web"]);
        let wf = workflow(&cli);
        let (d, s) = tokio::join!(wf.deployment(), wf.service());
        d.expect("deployment workflow");
        s.expect("service workflow");
    }

    #[tokio::test]
    async fn cancelled_workflow_reports_failure() {
        let cli = memory_cli(&[]);
        let wf = workflow(&cli);
        wf.cancel.cancel();
        let res = wf.deployment().await;
        assert!(!report("deployment", &res));
        let err = res.unwrap_err();
        assert!(format!("{err:#}").contains("cancelled"), "{err:#}");
    }

    #[test]
    fn kubeconfig_env_is_left_to_inference() {
        std::env::set_var("KUBECONFIG", "/tmp/reconkit/a:/tmp/reconkit/b");
        let cli = Cli::parse_from(["reconctl"]);
        std::env::remove_var("KUBECONFIG");
        assert_eq!(cli.config, None);
    }

    #[tokio::test]
    async fn pods_of_the_deployment_are_reported() {
        let mem = Arc::new(MemoryTransport::new());
        let token = CancellationToken::new();
        let pod = |name: &str, app: &str, phase: Option<&str>| {
            let mut doc = Document::new();
            doc.set(&["metadata", "labels", "app"], app).expect("labels");
            if let Some(phase) = phase {
                doc.set(&["status", "phase"], phase).expect("phase");
            }
            (ResourceIdentity::of::<Pod>("test", name), doc)
        };
        for (id, doc) in [
            pod("demo-1", "demo", Some("Running")),
            pod("demo-2", "demo", None),
            pod("cache-1", "cache", Some("Running")),
        ] {
            mem.create(&id, doc, &token).await.expect("seed pod");
        }

        let cli = memory_cli(&[]);
        let wf = workflow_over(&cli, mem.clone());
        let mut rec = wf.reconciler();
        let lines = wf.pods(&mut rec).await.expect("pods");
        assert_eq!(lines, vec!["Pod Name: demo-1 phase Running", "Pod Name: demo-2 phase unknown"]);

        wf.deployment().await.expect("deployment workflow with pods present");
        assert_eq!(mem.len(), 3);
    }
}
