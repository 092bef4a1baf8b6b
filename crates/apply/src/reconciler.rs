use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use reconkit_core::{Backoff, Error, Payload, PropagationPolicy, ResourceIdentity, ResourceType, Result};
use reconkit_kubehub::{Op, Transport};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::retry::retry_on_conflict;

/// Locally tracked lifecycle of a managed resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ResourceState {
    #[default]
    Absent,
    Creating,
    Present,
    Updating,
    Deleting,
}

/// What a successful step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    Created,
    AlreadyPresent,
    Updated { attempts: u32 },
    Deleted,
    AlreadyAbsent,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Created => "created",
            StepOutcome::AlreadyPresent => "already present",
            StepOutcome::Updated { .. } => "updated",
            StepOutcome::Deleted => "deleted",
            StepOutcome::AlreadyAbsent => "already absent",
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One listed object and the value found at the requested field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub name: String,
    pub observed: Option<Value>,
}

/// A step that failed for a reason the driver does not absorb.
#[derive(Debug, thiserror::Error)]
#[error("{operation} {target} failed")]
pub struct StepError {
    pub operation: Op,
    /// Identity of the resource, or `type namespace` for list steps.
    pub target: String,
    #[source]
    pub source: Error,
}

impl StepError {
    fn new(operation: Op, target: impl fmt::Display, source: Error) -> Self {
        Self { operation, target: target.to_string(), source }
    }
}

/// Hook run before every mutating or listing step. Returning an error aborts the step.
#[async_trait]
pub trait StepGate: Send + Sync {
    async fn before(&self, operation: Op, target: &str) -> Result<()>;
}

/// Drives resources toward a desired state one idempotent step at a time.
///
/// Steps are sequential within one `Reconciler`; run independent workflows
/// with separate reconcilers over a shared transport.
pub struct Reconciler {
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    cancel: CancellationToken,
    gate: Option<Arc<dyn StepGate>>,
    states: HashMap<ResourceIdentity, ResourceState>,
}

impl Reconciler {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            backoff: Backoff::default(),
            cancel: CancellationToken::new(),
            gate: None,
            states: HashMap::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn StepGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn transport(&self) -> &Arc<dyn Transport> { &self.transport }
    pub fn cancel_token(&self) -> &CancellationToken { &self.cancel }

    pub fn state(&self, id: &ResourceIdentity) -> ResourceState {
        self.states.get(id).copied().unwrap_or_default()
    }

    fn set_state(&mut self, id: &ResourceIdentity, state: ResourceState) {
        self.states.insert(id.clone(), state);
    }

    async fn pass_gate(&self, op: Op, target: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match &self.gate {
            Some(gate) => gate.before(op, target).await,
            None => Ok(()),
        }
    }

    /// Create `id` from `desired`; an existing object counts as success.
    pub async fn ensure_created<P: Payload>(&mut self, id: &ResourceIdentity, desired: &P) -> Result<StepOutcome, StepError> {
        let target = id.to_string();
        self.pass_gate(Op::Create, &target).await.map_err(|e| StepError::new(Op::Create, id, e))?;
        let prior = self.state(id);
        self.set_state(id, ResourceState::Creating);

        let res = match desired.to_document() {
            Ok(doc) => self.transport.create(id, doc, &self.cancel).await,
            Err(e) => Err(e),
        };
        let outcome = match res {
            Ok(created) => {
                info!(op = "create", resource = %id, uid = ?created.uid(), "created");
                StepOutcome::Created
            }
            Err(e) if e.is_already_exists() => {
                warn!(op = "create", resource = %id, "already present");
                StepOutcome::AlreadyPresent
            }
            Err(e) => {
                self.set_state(id, prior);
                return Err(fail(Op::Create, id, e));
            }
        };
        self.set_state(id, ResourceState::Present);
        record(Op::Create, &outcome);
        Ok(outcome)
    }

    /// Read-modify-write `id` through `transform`, retrying on conflicts.
    pub async fn ensure_updated<P, F>(&mut self, id: &ResourceIdentity, transform: F) -> Result<StepOutcome, StepError>
    where
        P: Payload,
        F: FnMut(&mut P) -> Result<()> + Send,
    {
        let target = id.to_string();
        self.pass_gate(Op::Update, &target).await.map_err(|e| StepError::new(Op::Update, id, e))?;
        let prior = self.state(id);
        self.set_state(id, ResourceState::Updating);

        match retry_on_conflict::<P, F>(self.transport.as_ref(), id, &self.backoff, &self.cancel, transform).await {
            Ok(done) => {
                self.set_state(id, ResourceState::Present);
                info!(op = "update", resource = %id, attempts = done.attempts, "updated");
                let outcome = StepOutcome::Updated { attempts: done.attempts };
                record(Op::Update, &outcome);
                Ok(outcome)
            }
            Err(e) => {
                let after = if e.is_not_found() { ResourceState::Absent } else { prior };
                self.set_state(id, after);
                Err(fail(Op::Update, id, e))
            }
        }
    }

    /// List `ty` in `namespace` and report the value at `field` for each object.
    ///
    /// A field that is absent, or whose path walks through a non-mapping,
    /// is reported as `None`.
    pub async fn list_and_report(
        &mut self,
        ty: &ResourceType,
        namespace: &str,
        selector: Option<&str>,
        field: &[&str],
    ) -> Result<Vec<ReportRow>, StepError> {
        let target = if namespace.is_empty() { ty.to_string() } else { format!("{} {}", ty, namespace) };
        self.pass_gate(Op::List, &target).await.map_err(|e| StepError::new(Op::List, &target, e))?;

        let docs = self
            .transport
            .list(ty, namespace, selector, &self.cancel)
            .await
            .map_err(|e| fail(Op::List, &target, e))?;
        let rows: Vec<ReportRow> = docs
            .iter()
            .map(|doc| {
                let name = doc.name().unwrap_or_default().to_string();
                let observed = match doc.get(field) {
                    Ok(v) => v.cloned(),
                    Err(e) => {
                        warn!(op = "list", object = %name, error = %e, "field not readable");
                        None
                    }
                };
                ReportRow { name, observed }
            })
            .collect();
        info!(op = "list", target = %target, items = rows.len(), "listed {} items", rows.len());
        counter!("reconcile_steps", 1u64, "op" => "list", "outcome" => "listed");
        Ok(rows)
    }

    /// Delete `id`; an already missing object counts as success.
    pub async fn ensure_deleted(&mut self, id: &ResourceIdentity, propagation: PropagationPolicy) -> Result<StepOutcome, StepError> {
        let target = id.to_string();
        self.pass_gate(Op::Delete, &target).await.map_err(|e| StepError::new(Op::Delete, id, e))?;
        let prior = self.state(id);
        self.set_state(id, ResourceState::Deleting);

        let outcome = match self.transport.delete(id, propagation, &self.cancel).await {
            Ok(()) => {
                info!(op = "delete", resource = %id, propagation = propagation.as_str(), "deleted");
                StepOutcome::Deleted
            }
            Err(e) if e.is_not_found() => {
                warn!(op = "delete", resource = %id, "already absent");
                StepOutcome::AlreadyAbsent
            }
            Err(e) => {
                self.set_state(id, prior);
                return Err(fail(Op::Delete, id, e));
            }
        };
        self.set_state(id, ResourceState::Absent);
        record(Op::Delete, &outcome);
        Ok(outcome)
    }
}

fn record(op: Op, outcome: &StepOutcome) {
    counter!("reconcile_steps", 1u64, "op" => op.as_str(), "outcome" => outcome.as_str());
}

fn fail(op: Op, target: impl fmt::Display, source: Error) -> StepError {
    counter!("reconcile_steps", 1u64, "op" => op.as_str(), "outcome" => "failed");
    let err = StepError::new(op, target, source);
    warn!(op = %op, target = %err.target, error = %err.source, "step failed");
    err
}
