//! Result streams shared by the maintenance engines.
//!
//! An engine runs as a background task and hands events to its caller through
//! a bounded channel. When the work ends the engine sends exactly one terminal
//! report and drops its sender.
//!
//! Every producer-side send races against the caller's [`CancelToken`], so a
//! consumer that stops reading never pins the background task: once the token
//! fires, the next send returns [`Interrupted`] and the engine winds down.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;

/// How an engine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamStatus {
    /// Every item was processed without error.
    Completed,
    /// Every item was processed, but `failures` of them failed.
    CompletedWithErrors { failures: usize },
    /// The run stopped early because the caller cancelled it.
    Cancelled,
}

impl StreamStatus {
    /// Build the terminal status from a failure tally.
    pub fn from_failures(failures: usize) -> Self {
        if failures == 0 {
            StreamStatus::Completed
        } else {
            StreamStatus::CompletedWithErrors { failures }
        }
    }

    /// Returns true only for a clean, complete run.
    pub fn is_ok(&self) -> bool {
        matches!(self, StreamStatus::Completed)
    }
}

/// A send was abandoned because the caller cancelled or dropped the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Create a connected emitter/stream pair.
pub(crate) fn channel<E, S>(ctx: CancelToken, buffer: usize) -> (Emitter<E, S>, ResultStream<E, S>) {
    let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
    let (terminal_tx, terminal_rx) = oneshot::channel();
    (
        Emitter {
            events: events_tx,
            terminal: terminal_tx,
            ctx,
        },
        ResultStream {
            events: events_rx,
            terminal: terminal_rx,
        },
    )
}

/// Producer half, owned by the engine task.
pub(crate) struct Emitter<E, S> {
    events: mpsc::Sender<E>,
    terminal: oneshot::Sender<S>,
    ctx: CancelToken,
}

impl<E, S> Emitter<E, S> {
    /// Send one event, giving up if the caller cancels or goes away.
    pub(crate) async fn emit(&self, event: E) -> std::result::Result<(), Interrupted> {
        if self.ctx.is_cancelled() {
            return Err(Interrupted);
        }
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(Interrupted),
            sent = self.events.send(event) => sent.map_err(|_| Interrupted),
        }
    }

    /// The cancellation signal this emitter races against.
    pub(crate) fn ctx(&self) -> &CancelToken {
        &self.ctx
    }

    /// Send the terminal report and close the stream.
    pub(crate) fn close(self, report: S) {
        // A consumer that dropped the stream no longer wants the report.
        let _ = self.terminal.send(report);
    }
}

/// Consumer half: ordered events followed by one terminal report.
///
/// Read events with [`next`](Self::next) (or through the [`Stream`] impl),
/// then call [`finish`](Self::finish). Dropping the stream early makes the
/// engine stop at its next send.
#[derive(Debug)]
pub struct ResultStream<E, S> {
    events: mpsc::Receiver<E>,
    terminal: oneshot::Receiver<S>,
}

impl<E, S> ResultStream<E, S> {
    /// Receive the next event, or `None` once the engine has closed the stream.
    pub async fn next(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Drain any unread events and return the terminal report.
    pub async fn finish(mut self) -> Result<S> {
        let mut skipped = 0usize;
        while self.events.recv().await.is_some() {
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(skipped, "discarded unread events while finishing stream");
        }
        self.terminal.await.map_err(|_| Error::StreamAborted)
    }
}

impl<E, S> Stream for ResultStream<E, S> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.events.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_events_arrive_in_order_then_report() {
        let (emitter, mut stream) = channel::<u32, &'static str>(CancelToken::new(), 8);
        tokio::spawn(async move {
            for i in 1..=3 {
                emitter.emit(i).await.unwrap();
            }
            emitter.close("done");
        });

        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            seen.push(event);
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(stream.finish().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_finish_drains_unread_events() {
        let (emitter, stream) = channel::<u32, usize>(CancelToken::new(), 1);
        let producer = tokio::spawn(async move {
            for i in 0..10 {
                emitter.emit(i).await.unwrap();
            }
            emitter.close(10);
        });

        assert_eq!(stream.finish().await.unwrap(), 10);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_emit_interrupted_by_cancel_when_consumer_is_slow() {
        let ctx = CancelToken::new();
        let (emitter, stream) = channel::<u32, ()>(ctx.clone(), 1);

        let producer = tokio::spawn(async move {
            let mut sent = 0;
            while emitter.emit(sent).await.is_ok() {
                sent += 1;
            }
            emitter.close(());
            sent
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();

        let sent = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent, 1, "only the buffered event fits before the consumer reads");
        drop(stream);
    }

    #[tokio::test]
    async fn test_emit_interrupted_when_stream_dropped() {
        let (emitter, stream) = channel::<u32, ()>(CancelToken::new(), 4);
        drop(stream);
        assert_eq!(emitter.emit(1).await, Err(Interrupted));
    }

    #[tokio::test]
    async fn test_finish_reports_aborted_producer() {
        let (emitter, stream) = channel::<u32, ()>(CancelToken::new(), 4);
        drop(emitter);
        assert!(matches!(stream.finish().await, Err(Error::StreamAborted)));
    }

    #[tokio::test]
    async fn test_stream_impl_collects_events() {
        let (emitter, mut stream) = channel::<u32, ()>(CancelToken::new(), 4);
        tokio::spawn(async move {
            emitter.emit(7).await.unwrap();
            emitter.emit(8).await.unwrap();
            emitter.close(());
        });

        let collected: Vec<u32> = (&mut stream).collect().await;
        assert_eq!(collected, vec![7, 8]);
        stream.finish().await.unwrap();
    }

    #[test]
    fn test_status_from_failures() {
        assert_eq!(StreamStatus::from_failures(0), StreamStatus::Completed);
        assert_eq!(
            StreamStatus::from_failures(2),
            StreamStatus::CompletedWithErrors { failures: 2 }
        );
        assert!(!StreamStatus::Cancelled.is_ok());
    }
}
