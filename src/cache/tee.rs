//! Tee Pipeline Module
//!
//! Wraps an origin body stream so the client can be served as bytes arrive
//! while an identical copy is captured for storage.
//!
//! [`tee`] returns the wrapped stream and a [`CaptureHandle`]. The stream has
//! exactly one consumer. The handle resolves once, after the stream reaches
//! its end, fails, or is dropped. A body larger than the capture limit is
//! still forwarded in full, but its capture is abandoned.

use std::fmt;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::sync::oneshot;
use tracing::debug;

// == Capture ==
/// The body captured by a finished tee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Every byte the client side was handed
    pub body: Bytes,
    /// Terminal error of the origin stream, if any
    pub error: Option<String>,
}

impl Capture {
    /// True when the origin stream ended cleanly.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

// == Capture Handle ==
/// The storage side of a tee.
#[derive(Debug)]
pub struct CaptureHandle {
    done: oneshot::Receiver<Capture>,
}

impl CaptureHandle {
    /// Waits for the tee to finish and returns its capture.
    pub async fn wait(self) -> Capture {
        self.done.await.unwrap_or_else(|_| Capture {
            body: Bytes::new(),
            error: Some("tee dropped without reporting".to_string()),
        })
    }
}

// == Tee State ==
#[derive(Debug)]
enum TeeState {
    NotStarted,
    Streaming { buffer: BytesMut },
    /// Past the capture limit; chunks are only forwarded
    Overflowed,
    Done { buffer: Bytes, error: Option<String> },
}

fn overflow_error(limit: usize) -> String {
    format!("body exceeds capture limit of {limit} bytes")
}

// == Tee Stream ==
/// Stream decorator that copies every chunk it yields.
pub struct TeeStream<E>
where
    E: fmt::Display + Send + 'static,
{
    inner: Option<BoxStream<'static, Result<Bytes, E>>>,
    state: TeeState,
    /// Largest body that is still captured
    limit: usize,
    done: Option<oneshot::Sender<Capture>>,
}

/// Splits `inner` into a client-facing stream and a capture handle. At most
/// `limit` bytes are captured.
pub fn tee<S, E>(inner: S, limit: usize) -> (TeeStream<E>, CaptureHandle)
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let stream = TeeStream {
        inner: Some(inner.boxed()),
        state: TeeState::NotStarted,
        limit,
        done: Some(tx),
    };
    (stream, CaptureHandle { done: rx })
}

impl<E> TeeStream<E>
where
    E: fmt::Display + Send + 'static,
{
    /// Appends `chunk` to the capture, abandoning it once over the limit.
    fn capture(&mut self, chunk: &Bytes) {
        let limit = self.limit;
        let overflowed = match &mut self.state {
            TeeState::Streaming { buffer } if buffer.len() + chunk.len() > limit => true,
            TeeState::Streaming { buffer } => {
                buffer.extend_from_slice(chunk);
                false
            }
            _ => false,
        };
        if overflowed {
            debug!(limit, "body too large to capture, forwarding only");
            self.state = TeeState::Overflowed;
        }
    }

    /// Moves to `Done` and fires the completion signal. Later calls are
    /// no-ops.
    fn finish(&mut self, error: Option<String>) {
        let (buffer, error) = match mem::replace(&mut self.state, TeeState::NotStarted) {
            TeeState::Done { buffer, error } => {
                self.state = TeeState::Done { buffer, error };
                return;
            }
            TeeState::NotStarted => (Bytes::new(), error),
            TeeState::Streaming { buffer } => (buffer.freeze(), error),
            TeeState::Overflowed => (Bytes::new(), Some(overflow_error(self.limit))),
        };
        self.inner = None;
        self.state = TeeState::Done {
            buffer: buffer.clone(),
            error: error.clone(),
        };
        if let Some(done) = self.done.take() {
            // Receiver gone means nobody wants the copy
            let _ = done.send(Capture {
                body: buffer,
                error,
            });
        }
    }
}

impl<E> Stream for TeeStream<E>
where
    E: fmt::Display + Send + 'static,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if matches!(this.state, TeeState::NotStarted) {
            this.state = TeeState::Streaming {
                buffer: BytesMut::new(),
            };
        }
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.capture(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.finish(Some(err.to_string()));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> Drop for TeeStream<E>
where
    E: fmt::Display + Send + 'static,
{
    /// A consumer that goes away early does not cut the capture short: the
    /// rest of the origin body is drained in the background, unless the
    /// capture was already abandoned.
    fn drop(&mut self) {
        match self.state {
            TeeState::Done { .. } => return,
            TeeState::Overflowed => return self.finish(None),
            TeeState::NotStarted | TeeState::Streaming { .. } => {}
        }
        let runtime = tokio::runtime::Handle::try_current();
        match (self.inner.take(), self.done.take(), runtime) {
            (Some(mut inner), Some(done), Ok(runtime)) => {
                let mut buffer = match mem::replace(&mut self.state, TeeState::Overflowed) {
                    TeeState::Streaming { buffer } => buffer,
                    _ => BytesMut::new(),
                };
                let limit = self.limit;
                debug!(captured = buffer.len(), "client went away, draining origin body");
                runtime.spawn(async move {
                    let mut error = None;
                    while let Some(chunk) = inner.next().await {
                        match chunk {
                            Ok(chunk) if buffer.len() + chunk.len() > limit => {
                                buffer.clear();
                                error = Some(overflow_error(limit));
                                break;
                            }
                            Ok(chunk) => buffer.extend_from_slice(&chunk),
                            Err(err) => {
                                error = Some(err.to_string());
                                break;
                            }
                        }
                    }
                    let _ = done.send(Capture {
                        body: buffer.freeze(),
                        error,
                    });
                });
            }
            (_, done, _) => {
                self.done = done;
                self.finish(Some("closed before end of stream".to_string()));
            }
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    use futures::stream;
    use tokio::sync::mpsc;
    use tokio_test::{assert_pending, assert_ready};

    type Chunk = Result<Bytes, io::Error>;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Chunk> + Send + 'static {
        let parts: Vec<Chunk> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(parts)
    }

    async fn drain<E>(mut tee: TeeStream<E>) -> Vec<u8>
    where
        E: fmt::Display + Send + 'static,
    {
        let mut seen = Vec::new();
        while let Some(Ok(chunk)) = tee.next().await {
            seen.extend_from_slice(&chunk);
        }
        seen
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let (tee, handle) = tee(chunks(&[]), usize::MAX);

        let seen = drain(tee).await;
        let capture = handle.wait().await;

        assert!(seen.is_empty());
        assert!(capture.body.is_empty());
        assert!(capture.is_complete());
    }

    #[tokio::test]
    async fn test_single_byte() {
        let (tee, handle) = tee(chunks(&[b"x"]), usize::MAX);

        let seen = drain(tee).await;
        let capture = handle.wait().await;

        assert_eq!(seen, b"x");
        assert_eq!(capture.body, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_many_chunks() {
        let (tee, handle) = tee(chunks(&[b"hello ", b"", b"tee ", b"world"]), usize::MAX);

        let seen = drain(tee).await;
        let capture = handle.wait().await;

        assert_eq!(seen, b"hello tee world");
        assert_eq!(capture.body, Bytes::from(seen));
        assert!(capture.is_complete());
    }

    #[tokio::test]
    async fn test_capture_waits_for_end_of_stream() {
        let (tx, rx) = mpsc::channel::<Chunk>(4);
        let inner = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        let (mut tee, handle) = tee(inner, usize::MAX);
        let mut waiting = tokio_test::task::spawn(handle.wait());

        tx.send(Ok(Bytes::from_static(b"part"))).await.unwrap();
        assert_eq!(tee.next().await.unwrap().unwrap(), Bytes::from_static(b"part"));
        assert_pending!(waiting.poll());

        drop(tx);
        assert!(tee.next().await.is_none());
        assert!(waiting.is_woken());
        let capture = assert_ready!(waiting.poll());
        assert_eq!(capture.body, Bytes::from_static(b"part"));
    }

    #[tokio::test]
    async fn test_origin_error_is_recorded() {
        let items: Vec<Chunk> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"never")),
        ];
        let (mut tee, handle) = tee(stream::iter(items), usize::MAX);

        assert!(tee.next().await.unwrap().is_ok());
        assert!(tee.next().await.unwrap().is_err());
        assert!(tee.next().await.is_none(), "nothing after a terminal error");

        let capture = handle.wait().await;
        assert_eq!(capture.body, Bytes::from_static(b"partial"));
        assert_eq!(capture.error.as_deref(), Some("reset"));
        assert!(!capture.is_complete());
    }

    #[tokio::test]
    async fn test_dropped_consumer_still_captures_everything() {
        let (mut tee, handle) = tee(chunks(&[b"one ", b"two ", b"three"]), usize::MAX);

        assert_eq!(tee.next().await.unwrap().unwrap(), Bytes::from_static(b"one "));
        drop(tee);

        let capture = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
        assert_eq!(capture.body, Bytes::from_static(b"one two three"));
        assert!(capture.is_complete());
    }

    #[tokio::test]
    async fn test_never_polled_drop_drains() {
        let (tee, handle) = tee(chunks(&[b"abc"]), usize::MAX);
        drop(tee);

        let capture = handle.wait().await;
        assert_eq!(capture.body, Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_drop_outside_runtime_reports_incomplete() {
        let (mut tee, handle) = tee(chunks(&[b"abc", b"def"]), usize::MAX);
        let first = futures::executor::block_on(tee.next());
        assert!(first.is_some());
        drop(tee);

        let capture = futures::executor::block_on(handle.wait());
        assert_eq!(capture.body, Bytes::from_static(b"abc"));
        assert!(!capture.is_complete());
    }

    #[tokio::test]
    async fn test_body_over_limit_is_forwarded_not_captured() {
        let (tee, handle) = tee(chunks(&[b"abc", b"def", b"ghi"]), 4);

        let seen = drain(tee).await;
        let capture = handle.wait().await;

        assert_eq!(seen, b"abcdefghi");
        assert!(capture.body.is_empty());
        assert!(!capture.is_complete());
    }

    #[tokio::test]
    async fn test_drop_after_overflow_skips_drain() {
        let (tx, rx) = mpsc::channel::<Chunk>(4);
        let inner = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        let (mut tee, handle) = tee(inner, 2);

        tx.send(Ok(Bytes::from_static(b"too big"))).await.unwrap();
        assert!(tee.next().await.is_some());
        drop(tee);

        // The sender stays open, so a drain would never finish
        let capture = tokio::time::timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap();
        assert!(capture.body.is_empty());
        assert!(!capture.is_complete());
        assert!(tx.is_closed(), "origin stream released without draining");
    }

    #[tokio::test]
    async fn test_drain_stops_at_limit() {
        let (mut tee, handle) = tee(chunks(&[b"ab", b"cd", b"efgh"]), 5);

        assert!(tee.next().await.is_some());
        drop(tee);

        let capture = handle.wait().await;
        assert!(capture.body.is_empty());
        assert!(!capture.is_complete());
    }
}
