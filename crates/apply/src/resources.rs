use std::marker::PhantomData;
use std::sync::Arc;

use reconkit_core::{Payload, PropagationPolicy, ResourceIdentity, ResourceType, Result};
use reconkit_kubehub::Transport;
use tokio_util::sync::CancellationToken;

/// Payload-typed view over one resource type in one namespace.
///
/// The same transport serves typed (`Resources<Deployment>`) and schema-less
/// (`Resources<Document>`) callers; only the conversion at the edge differs.
pub struct Resources<P> {
    transport: Arc<dyn Transport>,
    ty: ResourceType,
    namespace: String,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for Resources<P> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            ty: self.ty.clone(),
            namespace: self.namespace.clone(),
            _payload: PhantomData,
        }
    }
}

impl<K> Resources<K>
where
    K: k8s_openapi::Resource + Payload,
{
    /// Typed handle whose resource type comes from the compiled-in definition.
    pub fn typed(transport: Arc<dyn Transport>, namespace: impl Into<String>) -> Self {
        Self::new(transport, ResourceType::of::<K>(), namespace)
    }
}

impl<P: Payload> Resources<P> {
    pub fn new(transport: Arc<dyn Transport>, ty: ResourceType, namespace: impl Into<String>) -> Self {
        Self { transport, ty, namespace: namespace.into(), _payload: PhantomData }
    }

    pub fn resource_type(&self) -> &ResourceType { &self.ty }
    pub fn namespace(&self) -> &str { &self.namespace }

    pub fn identity(&self, name: &str) -> ResourceIdentity {
        self.ty.identity(self.namespace.clone(), name)
    }

    pub async fn create(&self, name: &str, desired: &P, cancel: &CancellationToken) -> Result<P> {
        let doc = desired.to_document()?;
        P::from_document(self.transport.create(&self.identity(name), doc, cancel).await?)
    }

    pub async fn get(&self, name: &str, cancel: &CancellationToken) -> Result<P> {
        P::from_document(self.transport.get(&self.identity(name), cancel).await?)
    }

    /// `object` must be an enriched payload previously returned by the server.
    pub async fn update(&self, name: &str, object: &P, cancel: &CancellationToken) -> Result<P> {
        let doc = object.to_document()?;
        P::from_document(self.transport.update(&self.identity(name), doc, cancel).await?)
    }

    pub async fn list(&self, selector: Option<&str>, cancel: &CancellationToken) -> Result<Vec<P>> {
        self.transport
            .list(&self.ty, &self.namespace, selector, cancel)
            .await?
            .into_iter()
            .map(P::from_document)
            .collect()
    }

    pub async fn delete(&self, name: &str, propagation: PropagationPolicy, cancel: &CancellationToken) -> Result<()> {
        self.transport.delete(&self.identity(name), propagation, cancel).await
    }
}
