//! Conduits that carry poller output to subscribers.
//!
//! An [`UpdateSink`] is held by exactly one poll loop. Records go to the
//! subscriber over an unbounded queue; non-fatal errors go to an optional,
//! bounded [`ErrorConduit`] that never blocks the loop.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Error, Result};
use crate::settings::PollSettings;
use crate::types::Record;

/// Receiving half of an error conduit.
pub type ErrorReceiver = mpsc::Receiver<Error>;

/// Create an error conduit holding at most `capacity` unread errors.
pub fn error_conduit(capacity: usize) -> (ErrorConduit, ErrorReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ErrorConduit { tx }, rx)
}

/// Bounded, non-blocking sink for background errors.
#[derive(Debug, Clone)]
pub struct ErrorConduit {
    tx: mpsc::Sender<Error>,
}

impl ErrorConduit {
    /// Forward an error without waiting.
    ///
    /// Returns `false` when the error was dropped because the conduit is full
    /// or its receiver is gone.
    pub fn forward(&self, error: Error) -> bool {
        match self.tx.try_send(error) {
            Ok(()) => true,
            Err(TrySendError::Full(error)) => {
                tracing::warn!(error = %error, "error conduit full, dropping error");
                false
            }
            Err(TrySendError::Closed(error)) => {
                tracing::debug!(error = %error, "error conduit closed, dropping error");
                false
            }
        }
    }
}

/// Output side of a single poll loop.
#[derive(Debug)]
pub struct UpdateSink {
    records: mpsc::UnboundedSender<Result<Record>>,
    conduit: Option<ErrorConduit>,
}

impl UpdateSink {
    pub(crate) fn new(
        records: mpsc::UnboundedSender<Result<Record>>,
        conduit: Option<ErrorConduit>,
    ) -> Self {
        Self { records, conduit }
    }

    /// Create a detached sink and the receiver for its records.
    ///
    /// Lets a [`Poller`](crate::Poller) be driven one pass at a time
    /// without a background loop.
    pub fn channel(
        settings: &PollSettings,
    ) -> (Self, mpsc::UnboundedReceiver<Result<Record>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, settings.error_conduit.clone()), rx)
    }

    /// Deliver a changed record.
    ///
    /// Returns `false` once the subscriber has gone away.
    pub fn emit(&self, record: Record) -> bool {
        tracing::trace!(key = %record.key, updated_at = %record.updated_at, "emitting record");
        self.records.send(Ok(record)).is_ok()
    }

    /// Report a recoverable error; the loop keeps running.
    pub fn report(&self, error: Error) {
        tracing::warn!(error = %error, "recoverable poll error");
        if let Some(conduit) = &self.conduit {
            conduit.forward(error);
        }
    }

    /// Report a fatal error and deliver it to the subscriber as the last item.
    pub(crate) fn fail(&self, error: Error) {
        tracing::error!(error = %error, "poll loop terminated by backend error");
        if let Some(conduit) = &self.conduit {
            conduit.forward(error.clone());
        }
        let _ = self.records.send(Err(error));
    }

    /// Check whether the subscriber has gone away.
    pub fn is_closed(&self) -> bool {
        self.records.is_closed()
    }
}
