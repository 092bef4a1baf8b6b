use std::time::Instant;

use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use metrics::{counter, histogram};
use reconkit_core::{Backoff, Document, Error, PropagationPolicy, ResourceIdentity, ResourceType, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{bind_identity, cancellable, drain_pages, map_kube_error, retry_transport, ConnectOptions, Op, Transport};

fn list_page_size() -> u32 {
    std::env::var("RECONKIT_LIST_PAGE_SIZE")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(500)
}

fn transport_retries() -> u32 {
    std::env::var("RECONKIT_TRANSPORT_RETRIES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(3)
}

/// Transport backed by a kube-rs [`Client`] using dynamic (schema-less) objects.
#[derive(Clone)]
pub struct KubeTransport {
    client: Client,
    page_size: u32,
    retries: u32,
    backoff: Backoff,
}

impl KubeTransport {
    /// Build a client from kubeconfig or in-cluster settings.
    pub async fn connect(opts: &ConnectOptions) -> Result<Self> {
        let config = crate::load_config(opts).await?;
        let client = Client::try_from(config).map_err(|e| Error::Configuration(format!("building client: {}", e)))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            page_size: list_page_size(),
            retries: transport_retries(),
            backoff: Backoff { steps: 3, ..Backoff::default() },
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn api(&self, ty: &ResourceType, namespace: &str) -> Api<DynamicObject> {
        let ar = api_resource(ty);
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }

    fn api_for(&self, id: &ResourceIdentity) -> Api<DynamicObject> {
        self.api(id.resource_type(), id.namespace())
    }
}

fn api_resource(ty: &ResourceType) -> ApiResource {
    let gvk = GroupVersionKind::gvk(ty.group(), ty.version(), ty.kind());
    ApiResource::from_gvk_with_plural(&gvk, ty.plural())
}

fn to_object(doc: Document) -> Result<DynamicObject> {
    Ok(serde_json::from_value(doc.into_value())?)
}

/// List items come back without `apiVersion`/`kind`; restore them from the requested type.
fn to_document(obj: &DynamicObject, ty: &ResourceType) -> Result<Document> {
    let mut doc = Document::from_value(serde_json::to_value(obj)?)?;
    if doc.api_version().is_none() {
        doc.set(&["apiVersion"], ty.api_version())?;
    }
    if doc.kind().is_none() {
        doc.set(&["kind"], ty.kind())?;
    }
    Ok(doc)
}

fn delete_params(propagation: PropagationPolicy) -> DeleteParams {
    match propagation {
        PropagationPolicy::Foreground => DeleteParams::foreground(),
        PropagationPolicy::Background => DeleteParams::background(),
        PropagationPolicy::Orphan => DeleteParams::orphan(),
    }
}

/// Record request metrics and normalize errors.
fn observe<T>(op: Op, started: Instant, res: std::result::Result<T, kube::Error>) -> Result<T> {
    histogram!("transport_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op.as_str());
    counter!("transport_requests", 1u64, "op" => op.as_str());
    res.map_err(|e| {
        let err = map_kube_error(e);
        counter!("transport_errors", 1u64, "op" => op.as_str(), "kind" => err.kind());
        err
    })
}

#[async_trait::async_trait]
impl Transport for KubeTransport {
    async fn create(&self, id: &ResourceIdentity, doc: Document, cancel: &CancellationToken) -> Result<Document> {
        let obj = to_object(bind_identity(id, doc)?)?;
        let api = self.api_for(id);
        debug!(resource = %id, "create");
        cancellable(cancel, async {
            let started = Instant::now();
            let created = observe(Op::Create, started, api.create(&PostParams::default(), &obj).await)?;
            to_document(&created, id.resource_type())
        })
        .await
    }

    async fn get(&self, id: &ResourceIdentity, cancel: &CancellationToken) -> Result<Document> {
        let api = self.api_for(id);
        retry_transport(Op::Get, self.retries, &self.backoff, cancel, || {
            let api = api.clone();
            async move {
                cancellable(cancel, async {
                    let started = Instant::now();
                    let obj = observe(Op::Get, started, api.get(id.name()).await)?;
                    to_document(&obj, id.resource_type())
                })
                .await
            }
        })
        .await
    }

    async fn update(&self, id: &ResourceIdentity, doc: Document, cancel: &CancellationToken) -> Result<Document> {
        let doc = bind_identity(id, doc)?;
        if doc.resource_version().is_none() {
            return Err(Error::Invalid(format!("{}: update requires metadata.resourceVersion", id)));
        }
        let obj = to_object(doc)?;
        let api = self.api_for(id);
        debug!(resource = %id, rv = ?obj.metadata.resource_version, "replace");
        cancellable(cancel, async {
            let started = Instant::now();
            let updated = observe(Op::Update, started, api.replace(id.name(), &PostParams::default(), &obj).await)?;
            to_document(&updated, id.resource_type())
        })
        .await
    }

    async fn list(
        &self,
        ty: &ResourceType,
        namespace: &str,
        selector: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        let api = self.api(ty, namespace);
        let mut base = ListParams::default().limit(self.page_size);
        if let Some(sel) = selector.filter(|s| !s.is_empty()) {
            base = base.labels(sel);
        }
        retry_transport(Op::List, self.retries, &self.backoff, cancel, || {
            let api = api.clone();
            let base = base.clone();
            async move {
                cancellable(cancel, drain_pages(|token| {
                    let api = api.clone();
                    let mut lp = base.clone();
                    async move {
                        if let Some(t) = token {
                            lp = lp.continue_token(&t);
                        }
                        let started = Instant::now();
                        let page = observe(Op::List, started, api.list(&lp).await)?;
                        let next = page.metadata.continue_.clone();
                        let docs = page.items.iter().map(|o| to_document(o, ty)).collect::<Result<Vec<_>>>()?;
                        Ok((docs, next))
                    }
                }))
                .await
            }
        })
        .await
    }

    async fn delete(&self, id: &ResourceIdentity, propagation: PropagationPolicy, cancel: &CancellationToken) -> Result<()> {
        let api = self.api_for(id);
        let dp = delete_params(propagation);
        retry_transport(Op::Delete, self.retries, &self.backoff, cancel, || {
            let api = api.clone();
            let dp = dp.clone();
            async move {
                cancellable(cancel, async {
                    let started = Instant::now();
                    observe(Op::Delete, started, api.delete(id.name(), &dp).await)?;
                    Ok(())
                })
                .await
            }
        })
        .await
    }
}
