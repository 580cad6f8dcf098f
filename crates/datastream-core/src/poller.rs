//! Background poll loop and the subscription handle it feeds.
//!
//! Every backend answers "what changed since I last looked?" with its own
//! witness. The [`Poller`] trait captures one detection pass; [`spawn_poller`]
//! drives it on a tokio task until the subscriber cancels or the pass fails
//! fatally.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::settings::PollSettings;
use crate::sink::UpdateSink;
use crate::types::Record;

/// One change-detection pass over a backend.
///
/// The implementor owns its witness state exclusively; nothing else reads or
/// writes it while the loop runs.
#[async_trait]
pub trait Poller: Send + 'static {
    /// Backend name used in log fields.
    fn backend(&self) -> &'static str;

    /// Compare the backend against the witness, emit every changed record and
    /// advance the witness.
    ///
    /// Recoverable failures are reported through the sink. Returning an error
    /// ends the subscription.
    async fn poll(&mut self, sink: &UpdateSink) -> Result<()>;
}

/// Start a poll loop for `poller` on the current tokio runtime.
pub fn spawn_poller<P: Poller>(poller: P, settings: &PollSettings) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = UpdateSink::new(tx, settings.error_conduit.clone());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(run_loop(poller, sink, settings.interval, cancel.clone()));

    Subscription {
        rx,
        cancel,
        handle: Some(handle),
    }
}

async fn run_loop<P: Poller>(
    mut poller: P,
    sink: UpdateSink,
    interval: Duration,
    cancel: CancellationToken,
) {
    let backend = poller.backend();
    tracing::debug!(backend, interval_ms = interval.as_millis() as u64, "poll loop started");

    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = poller.poll(&sink) => outcome,
        };

        if let Err(e) = outcome {
            tracing::error!(backend, error = %e, "poll pass failed");
            sink.fail(e);
            break;
        }

        if sink.is_closed() {
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(backend, "poll loop stopped");
}

/// Live stream of changed records for one subscribe call.
///
/// Yields `Ok(record)` for every change. If the backend fails fatally the
/// last item is `Err` and the stream then ends. Dropping the handle cancels
/// the background loop.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Result<Record>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wait for the next change.
    pub async fn next(&mut self) -> Option<Result<Record>> {
        self.rx.recv().await
    }

    /// Stop the loop and discard anything not yet delivered.
    ///
    /// The stream ends cleanly afterwards, without an error item.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    /// Token that cancels this subscription when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel and wait for the background loop to exit.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Stream for Subscription {
    type Item = Result<Record>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
