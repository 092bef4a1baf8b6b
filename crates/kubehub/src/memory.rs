//! In-process control plane with optimistic concurrency.
//!
//! Behaves like an API server for the subset reconkit uses: server-assigned
//! `uid`/`resourceVersion`/`creationTimestamp`, `Conflict` on stale writes,
//! paged lists, owner-reference cascades on delete. Faults and latency can be
//! injected to exercise retry and cancellation paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use reconkit_core::{Document, Error, PropagationPolicy, ResourceIdentity, ResourceType, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::{bind_identity, drain_pages, sleep_cancellable, LabelSelector, Op, Transport};

/// (group, plural, namespace, name)
type Key = (String, String, String, String);

fn key_of(id: &ResourceIdentity) -> Key {
    let ty = id.resource_type();
    (ty.group().to_string(), ty.plural().to_string(), id.namespace().to_string(), id.name().to_string())
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Document>,
    last_rv: u64,
    pending_conflicts: u32,
    injected: Vec<(Op, Error)>,
    latency: Duration,
    page_size: Option<usize>,
    calls: HashMap<Op, u64>,
    pages: u64,
    deletions: Vec<(ResourceIdentity, PropagationPolicy)>,
}

impl State {
    fn next_rv(&mut self) -> String {
        self.last_rv += 1;
        self.last_rv.to_string()
    }

    fn take_injected(&mut self, op: Op) -> Option<Error> {
        let pos = self.injected.iter().position(|(o, _)| *o == op)?;
        Some(self.injected.remove(pos).1)
    }
}

#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl MemoryTransport {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `n` updates fail with `Conflict`, as if another writer got there first.
    pub fn fail_next_updates_with_conflict(&self, n: u32) {
        self.lock().pending_conflicts = n;
    }

    /// The next call of `op` fails with `err` before touching the store.
    pub fn fail_next(&self, op: Op, err: Error) {
        self.lock().injected.push((op, err));
    }

    /// Every call waits this long first (cancellably).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Serve lists in pages of `n` items.
    pub fn set_page_size(&self, n: usize) {
        self.lock().page_size = Some(n.max(1));
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn calls(&self, op: Op) -> u64 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Pages served across all lists.
    pub fn pages_served(&self) -> u64 { self.lock().pages }

    /// Deletions requested so far, with the propagation policy they carried.
    pub fn deletions(&self) -> Vec<(ResourceIdentity, PropagationPolicy)> {
        self.lock().deletions.clone()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    async fn enter(&self, op: Op, cancel: &CancellationToken) -> Result<()> {
        let latency = {
            let mut st = self.lock();
            *st.calls.entry(op).or_default() += 1;
            st.latency
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !latency.is_zero() {
            sleep_cancellable(cancel, latency).await?;
        }
        match self.lock().take_injected(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn list_page(
        &self,
        ty: &ResourceType,
        namespace: &str,
        selector: &LabelSelector,
        after: Option<String>,
    ) -> Result<(Vec<Document>, Option<String>)> {
        // Continue tokens are `namespace/name` of the last item served.
        let after = after.as_deref().and_then(|t| t.split_once('/'));
        let mut st = self.lock();
        st.pages += 1;
        let limit = st.page_size.unwrap_or(usize::MAX);
        let mut items: Vec<(String, Document)> = Vec::new();
        let mut next = None;
        for ((group, plural, ns, name), doc) in st.objects.iter() {
            if group != ty.group() || plural != ty.plural() {
                continue;
            }
            if !namespace.is_empty() && ns != namespace {
                continue;
            }
            if after.is_some_and(|a| (ns.as_str(), name.as_str()) <= a) {
                continue;
            }
            if !selector.matches(doc.labels()) {
                continue;
            }
            if items.len() == limit {
                next = items.last().map(|(token, _)| token.clone());
                break;
            }
            items.push((format!("{}/{}", ns, name), doc.clone()));
        }
        Ok((items.into_iter().map(|(_, d)| d).collect(), next))
    }
}

/// Server-side defaults a real API server would fill in.
fn apply_defaults(ty: &ResourceType, doc: &mut Document) -> Result<()> {
    if ty.group() == "apps" && ty.kind() == "Deployment" && doc.get(&["spec", "replicas"])?.is_none() {
        doc.set(&["spec", "replicas"], 1)?;
    }
    Ok(())
}

fn owned_by(doc: &Document, uid: &str) -> bool {
    doc.get_slice(&["metadata", "ownerReferences"])
        .ok()
        .flatten()
        .map(|refs| refs.iter().any(|r| r.get("uid").and_then(Value::as_str) == Some(uid)))
        .unwrap_or(false)
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn create(&self, id: &ResourceIdentity, doc: Document, cancel: &CancellationToken) -> Result<Document> {
        self.enter(Op::Create, cancel).await?;
        let mut doc = bind_identity(id, doc)?;
        if doc.resource_version().is_some() {
            return Err(Error::Invalid(format!("{}: resourceVersion should not be set on objects to be created", id)));
        }
        apply_defaults(id.resource_type(), &mut doc)?;
        let mut st = self.lock();
        let key = key_of(id);
        if st.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("{} already exists", id)));
        }
        let rv = st.next_rv();
        doc.set(&["metadata", "uid"], Uuid::new_v4().to_string())?;
        doc.set(&["metadata", "resourceVersion"], rv)?;
        doc.set(&["metadata", "generation"], 1)?;
        doc.set(&["metadata", "creationTimestamp"], chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true))?;
        st.objects.insert(key, doc.clone());
        debug!(resource = %id, rv = ?doc.resource_version(), "memory create");
        Ok(doc)
    }

    async fn get(&self, id: &ResourceIdentity, cancel: &CancellationToken) -> Result<Document> {
        self.enter(Op::Get, cancel).await?;
        self.lock()
            .objects
            .get(&key_of(id))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} not found", id)))
    }

    async fn update(&self, id: &ResourceIdentity, doc: Document, cancel: &CancellationToken) -> Result<Document> {
        self.enter(Op::Update, cancel).await?;
        let mut doc = bind_identity(id, doc)?;
        let sent_rv = doc
            .resource_version()
            .map(str::to_string)
            .ok_or_else(|| Error::Invalid(format!("{}: update requires metadata.resourceVersion", id)))?;
        let mut st = self.lock();
        let key = key_of(id);
        if !st.objects.contains_key(&key) {
            return Err(Error::NotFound(format!("{} not found", id)));
        }
        if st.pending_conflicts > 0 {
            st.pending_conflicts -= 1;
            let rv = st.next_rv();
            if let Some(stored) = st.objects.get_mut(&key) {
                stored.set(&["metadata", "resourceVersion"], rv)?;
            }
        }
        let stored = match st.objects.get(&key) {
            Some(s) => s.clone(),
            None => return Err(Error::NotFound(format!("{} not found", id))),
        };
        if stored.resource_version() != Some(sent_rv.as_str()) {
            return Err(Error::Conflict(format!(
                "{}: the object has been modified (sent rv {}, current rv {}); apply your changes to the latest version and try again",
                id,
                sent_rv,
                stored.resource_version().unwrap_or("")
            )));
        }
        for field in ["uid", "creationTimestamp"] {
            if let Some(v) = stored.get(&["metadata", field])? {
                doc.set(&["metadata", field], v.clone())?;
            }
        }
        let generation = stored.get_i64(&["metadata", "generation"])?.unwrap_or(1);
        let spec_changed = stored.get(&["spec"])? != doc.get(&["spec"])?;
        doc.set(&["metadata", "generation"], if spec_changed { generation + 1 } else { generation })?;
        let rv = st.next_rv();
        doc.set(&["metadata", "resourceVersion"], rv)?;
        st.objects.insert(key, doc.clone());
        debug!(resource = %id, rv = ?doc.resource_version(), "memory update");
        Ok(doc)
    }

    async fn list(
        &self,
        ty: &ResourceType,
        namespace: &str,
        selector: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Document>> {
        self.enter(Op::List, cancel).await?;
        let selector: LabelSelector = selector.unwrap_or("").parse()?;
        let selector = &selector;
        drain_pages(move |after| async move { self.list_page(ty, namespace, selector, after) }).await
    }

    async fn delete(&self, id: &ResourceIdentity, propagation: PropagationPolicy, cancel: &CancellationToken) -> Result<()> {
        self.enter(Op::Delete, cancel).await?;
        let mut st = self.lock();
        let key = key_of(id);
        let removed = st.objects.remove(&key).ok_or_else(|| Error::NotFound(format!("{} not found", id)))?;
        st.deletions.push((id.clone(), propagation));

        // Walk owner references: cascade for Foreground/Background, detach for Orphan.
        let mut owners: Vec<String> = removed.uid().map(str::to_string).into_iter().collect();
        while let Some(uid) = owners.pop() {
            let dependents: Vec<Key> = st.objects.iter().filter(|(_, d)| owned_by(d, &uid)).map(|(k, _)| k.clone()).collect();
            for dep in dependents {
                match propagation {
                    PropagationPolicy::Orphan => {
                        if let Some(d) = st.objects.get_mut(&dep) {
                            let kept: Vec<Value> = d
                                .get_slice(&["metadata", "ownerReferences"])?
                                .map(|refs| refs.iter().filter(|r| r.get("uid").and_then(Value::as_str) != Some(uid.as_str())).cloned().collect())
                                .unwrap_or_default();
                            d.set(&["metadata", "ownerReferences"], Value::Array(kept))?;
                        }
                    }
                    PropagationPolicy::Foreground | PropagationPolicy::Background => {
                        if let Some(d) = st.objects.remove(&dep) {
                            owners.extend(d.uid().map(str::to_string));
                        }
                    }
                }
            }
        }
        debug!(resource = %id, propagation = propagation.as_str(), "memory delete");
        Ok(())
    }
}
