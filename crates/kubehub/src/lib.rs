//! reconkit kubehub: transports that speak to a control plane.
//!
//! [`Transport`] is the seam the reconciler depends on. [`KubeTransport`] talks
//! to a real API server through kube-rs; [`MemoryTransport`] is an in-process
//! control plane with optimistic concurrency, used by tests and dry demos.

#![forbid(unsafe_code)]

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reconkit_core::{Backoff, Document, Error, PropagationPolicy, ResourceIdentity, ResourceType, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

mod config;
mod errors;
mod live;
mod memory;
mod paging;
mod selector;

pub use config::{load_config, ConnectOptions};
pub use errors::{map_kube_error, map_status};
pub use live::KubeTransport;
pub use memory::MemoryTransport;
pub use paging::drain_pages;
pub use selector::LabelSelector;

/// Transport operation, used for logging, metrics and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Create,
    Get,
    Update,
    List,
    Delete,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Get => "get",
            Op::Update => "update",
            Op::List => "list",
            Op::Delete => "delete",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// CRUD + List against a control plane. Every call is a round trip; nothing is cached.
///
/// Implementations must be safe to share between concurrent workflows and must
/// return [`Error::Cancelled`] promptly once `cancel` fires.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fails with `AlreadyExists` when the name is taken, `Invalid` when rejected.
    async fn create(&self, id: &ResourceIdentity, doc: Document, cancel: &CancellationToken) -> Result<Document>;

    async fn get(&self, id: &ResourceIdentity, cancel: &CancellationToken) -> Result<Document>;

    /// `doc` must carry the resourceVersion it was read at; a stale one fails with `Conflict`.
    async fn update(&self, id: &ResourceIdentity, doc: Document, cancel: &CancellationToken) -> Result<Document>;

    /// Full enumeration; any server-side paging is drained before returning.
    async fn list(
        &self,
        ty: &ResourceType,
        namespace: &str,
        selector: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>>;

    async fn delete(&self, id: &ResourceIdentity, propagation: PropagationPolicy, cancel: &CancellationToken) -> Result<()>;
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Sleep for `dur`, returning `Cancelled` early if `cancel` fires.
pub async fn sleep_cancellable(cancel: &CancellationToken, dur: Duration) -> Result<()> {
    cancellable(cancel, async {
        tokio::time::sleep(dur).await;
        Ok(())
    })
    .await
}

/// Turn a timeout into a cancellation: `token` is cancelled once `after` elapses.
pub fn cancel_after(token: &CancellationToken, after: Duration) -> tokio::task::JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(after) => token.cancel(),
        }
    })
}

/// Retry `call` on transport-level failures only. Meant for idempotent operations.
pub async fn retry_transport<T, F, Fut>(op: Op, attempts: u32, backoff: &Backoff, cancel: &CancellationToken, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_retryable_transport() && attempt < attempts => {
                warn!(op = %op, attempt, error = %e, "transport error; retrying");
                metrics::counter!("transport_retries", 1u64, "op" => op.as_str());
                sleep_cancellable(cancel, backoff.delay(attempt)).await?;
                attempt += 1;
            }
            res => return res,
        }
    }
}

/// Fill `apiVersion`, `kind`, `metadata.name` and `metadata.namespace` from `id`,
/// rejecting a document that names a different object.
pub fn bind_identity(id: &ResourceIdentity, mut doc: Document) -> Result<Document> {
    let ty = id.resource_type();
    let api_version = ty.api_version();
    let checks: [(&[&str], &str); 4] = [
        (&["apiVersion"], api_version.as_str()),
        (&["kind"], ty.kind()),
        (&["metadata", "name"], id.name()),
        (&["metadata", "namespace"], id.namespace()),
    ];
    for (path, want) in checks {
        match doc.get_str(path)? {
            Some(have) if have == want => {}
            Some(have) if want.is_empty() => {
                return Err(Error::Invalid(format!("{}: {} is set to {:?} on a cluster-scoped identity", id, path.join("."), have)));
            }
            Some(have) => {
                return Err(Error::Invalid(format!("{}: {} is {:?}, expected {:?}", id, path.join("."), have, want)));
            }
            None if want.is_empty() => {}
            None => doc.set(path, want)?,
        }
    }
    Ok(doc)
}
