use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tosm_model::{ChangeEvent, ResultEntry};

use crate::progress::{ConnectorProgress, ConnectorState};

#[derive(thiserror::Error, Debug)]
pub enum PollError {
    #[error("connector error: {0}")]
    Connector(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("close error: {0}")]
    Close(String),
}

/// Poll-and-decode capability of any network consumer. Implementations
/// return one decoded batch per poll; an empty batch is a successful
/// poll that simply found nothing.
#[async_trait::async_trait]
pub trait ChangePoller: Send {
    async fn poll(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<ChangeEvent>, PollError>;

    /// False once the poller was stopped externally; the poll loop
    /// exits at the next iteration.
    fn is_running(&self) -> bool;

    async fn close(&mut self) -> Result<(), PollError>;
}

/// Intake seam between a poll loop and the decision pipeline.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn submit(&self, event: ChangeEvent);
}

/// Generic polling driver. Wraps a [`ChangePoller`], feeds decoded
/// batches into an [`EventSink`] and reports every step into the
/// poller's [`ConnectorProgress`].
///
/// Transient poll failures are retried indefinitely at a fixed
/// interval; only an external stop (poller not running, or the
/// cancellation token) ends the loop.
pub struct PollLoop<P, S> {
    poller: P,
    sink: Arc<S>,
    progress: Arc<ConnectorProgress>,
    poll_timeout: Duration,
    retry_interval: Duration,
    token: CancellationToken,
}

impl<P, S> PollLoop<P, S>
where
    P: ChangePoller,
    S: EventSink,
{
    pub fn new(
        poller: P,
        sink: Arc<S>,
        progress: Arc<ConnectorProgress>,
        poll_timeout: Duration,
        retry_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            poller,
            sink,
            progress,
            poll_timeout,
            retry_interval,
            token,
        }
    }

    /// Drives the poller until it stops. Never returns an error:
    /// everything is reported through the progress.
    pub async fn run(mut self) {
        self.progress.set_progress_when(
            ConnectorState::Connecting,
            ConnectorState::Initialized,
        );
        info!(connector = %self.progress.name(), "poll loop started");

        while self.poller.is_running() && !self.token.is_cancelled() {
            match self.poller.poll(self.poll_timeout).await {
                Ok(batch) => {
                    self.progress
                        .set_progress(ConnectorState::Connected, ResultEntry::ok());
                    if !batch.is_empty() {
                        debug!(
                            connector = %self.progress.name(),
                            count = batch.len(),
                            "collected batch"
                        );
                    }
                    for event in batch {
                        self.sink.submit(event).await;
                    }
                }
                Err(e) => {
                    let wait = self.retry_interval;
                    self.progress.set_progress(
                        ConnectorState::Reconnecting,
                        ResultEntry::from_error(
                            format!("retry after {} ms", wait.as_millis()),
                            e,
                        ),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.token.cancelled() => break,
                    }
                }
            }
        }

        self.progress.set_progress_ok(ConnectorState::Stopping);
        match self.poller.close().await {
            Ok(()) => {
                self.progress.set_progress_ok(ConnectorState::Stopped);
            }
            Err(e) => {
                // close failures are reported but never block shutdown
                self.progress.set_progress(
                    ConnectorState::Stopped,
                    ResultEntry::from_error("close failed", e),
                );
            }
        }
        info!(connector = %self.progress.name(), "poll loop stopped");
    }
}
