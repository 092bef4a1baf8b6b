use metrics::counter;
use reconkit_core::{Backoff, Error, Payload, ResourceIdentity, Result};
use reconkit_kubehub::{sleep_cancellable, Transport};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a successful read-modify-write.
#[derive(Debug, Clone)]
pub struct Mutated<P> {
    /// The object as stored by the server after the write.
    pub object: P,
    /// Get/transform/update cycles used, including the successful one.
    pub attempts: u32,
}

/// Read-modify-write `id`, retrying when another writer wins the race.
///
/// Each attempt re-reads the object, so the write always carries the
/// resourceVersion of the read that preceded it. `transform` may run once per
/// attempt and must not have side effects outside the payload. Only `Conflict`
/// is retried; after `backoff.steps` conflicting attempts the last conflict is
/// returned inside `RetryExhausted`.
pub async fn retry_on_conflict<P, F>(
    transport: &dyn Transport,
    id: &ResourceIdentity,
    backoff: &Backoff,
    cancel: &CancellationToken,
    mut transform: F,
) -> Result<Mutated<P>>
where
    P: Payload,
    F: FnMut(&mut P) -> Result<()> + Send,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 1;
    loop {
        let current = transport.get(id, cancel).await?;
        let observed_rv = current.resource_version().map(str::to_string);
        let mut object = P::from_document(current)?;
        transform(&mut object)?;
        let mut doc = object.to_document()?;
        if let Some(rv) = &observed_rv {
            doc.set(&["metadata", "resourceVersion"], rv.as_str())?;
        }

        match transport.update(id, doc, cancel).await {
            Ok(updated) => {
                return Ok(Mutated { object: P::from_document(updated)?, attempts: attempt });
            }
            Err(e) if e.is_conflict() => {
                counter!("conflict_retries", 1u64);
                if attempt >= steps {
                    counter!("retry_exhausted", 1u64);
                    return Err(Error::RetryExhausted { attempts: attempt, last: Box::new(e) });
                }
                let delay = backoff.delay(attempt);
                debug!(resource = %id, attempt, rv = ?observed_rv, delay_ms = delay.as_millis() as u64, "update conflicted; retrying");
                sleep_cancellable(cancel, delay).await?;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
