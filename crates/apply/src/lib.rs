//! reconkit apply: idempotent reconciliation over a [`Transport`](reconkit_kubehub::Transport).
//!
//! [`retry_on_conflict`] is the optimistic-concurrency read-modify-write loop;
//! [`Reconciler`] sequences create/update/list/delete steps for one workflow and
//! tracks what it believes each resource's state to be.

#![forbid(unsafe_code)]

mod reconciler;
mod resources;
mod retry;

pub use reconciler::{Reconciler, ReportRow, ResourceState, StepError, StepGate, StepOutcome};
pub use resources::Resources;
pub use retry::{retry_on_conflict, Mutated};
