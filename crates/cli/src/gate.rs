use std::io::Write;

use async_trait::async_trait;
use reconkit_apply::StepGate;
use reconkit_core::{Error, Result};
use reconkit_kubehub::{cancellable, Op};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Waits for Enter before each step.
///
/// Prompts from concurrent workflows are taken one at a time. The wait ends
/// with `Cancelled` as soon as the token fires, even if no input ever arrives.
pub struct StdinGate<R = BufReader<Stdin>> {
    cancel: CancellationToken,
    input: Mutex<R>,
}

impl StdinGate {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_input(cancel, BufReader::new(tokio::io::stdin()))
    }
}

impl<R> StdinGate<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn with_input(cancel: CancellationToken, input: R) -> Self {
        Self { cancel, input: Mutex::new(input) }
    }
}

fn prompt(operation: Op, target: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "-> press Enter to {operation} {target} ");
    let _ = out.flush();
}

#[async_trait]
impl<R> StepGate for StdinGate<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn before(&self, operation: Op, target: &str) -> Result<()> {
        let mut input = self.input.lock().await;
        prompt(operation, target);
        let mut line = String::new();
        let read = cancellable(&self.cancel, async { Ok(input.read_line(&mut line).await) }).await?;
        match read {
            Ok(0) => {
                warn!("stdin closed; continuing without pausing");
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "reading stdin failed");
                Err(Error::Cancelled)
            }
        }
    }
}
