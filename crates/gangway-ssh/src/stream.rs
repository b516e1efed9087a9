use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Forwarded stream on the shared transport.
///
/// Closing it releases only the channel; the transport stays up for the
/// other tunnels multiplexed on it, and stream errors never implicate
/// the transport.
pub struct TunnelStream<S> {
    inner: S,
}

impl<S> TunnelStream<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TunnelStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TunnelStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Teardown of the resources behind a [`CompatStream`]: the private
/// transport and, transitively, the carrier it runs on.
pub type TeardownFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

type TeardownFn = Box<dyn FnOnce() -> TeardownFuture + Send>;

enum ShutdownState {
    Inner,
    Teardown {
        first_error: Option<io::Error>,
        fut: TeardownFuture,
    },
    Done,
}

/// Connection on the compatibility path, where the transport is private
/// to this stream rather than shared.
///
/// Shutdown closes the forwarded stream, then drives the teardown of the
/// private transport and carrier, returning the first error. The
/// teardown runs exactly once: a non-EOF read or write error or a plain
/// drop also triggers it, detached and best-effort (end-of-stream is a
/// clean 0-byte read, not an error).
pub struct CompatStream<S> {
    inner: S,
    teardown: Option<TeardownFn>,
    state: ShutdownState,
}

impl<S> CompatStream<S> {
    pub(crate) fn new(inner: S, teardown: impl FnOnce() -> TeardownFuture + Send + 'static) -> Self {
        Self {
            inner,
            teardown: Some(Box::new(teardown)),
            state: ShutdownState::Inner,
        }
    }

    /// Start the teardown without waiting for its result.
    fn teardown_detached(&mut self) {
        let Some(teardown) = self.teardown.take() else {
            return;
        };
        let fut = teardown();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = fut.await {
                    tracing::debug!("compat stream teardown failed: {}", err);
                }
            });
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CompatStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Err(err)) => {
                this.teardown_detached();
                Poll::Ready(Err(err))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CompatStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Err(err)) => {
                this.teardown_detached();
                Poll::Ready(Err(err))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(Err(err)) => {
                this.teardown_detached();
                Poll::Ready(Err(err))
            }
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, ShutdownState::Done) {
                ShutdownState::Inner => match Pin::new(&mut this.inner).poll_shutdown(cx) {
                    Poll::Pending => {
                        this.state = ShutdownState::Inner;
                        return Poll::Pending;
                    }
                    Poll::Ready(result) => match this.teardown.take() {
                        Some(teardown) => {
                            this.state = ShutdownState::Teardown {
                                first_error: result.err(),
                                fut: teardown(),
                            };
                        }
                        None => return Poll::Ready(result),
                    },
                },
                ShutdownState::Teardown {
                    mut first_error,
                    mut fut,
                } => match fut.as_mut().poll(cx) {
                    Poll::Pending => {
                        this.state = ShutdownState::Teardown { first_error, fut };
                        return Poll::Pending;
                    }
                    Poll::Ready(teardown_result) => {
                        return Poll::Ready(match first_error.take() {
                            Some(err) => Err(err),
                            None => teardown_result,
                        });
                    }
                },
                ShutdownState::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl<S> Drop for CompatStream<S> {
    fn drop(&mut self) {
        self.teardown_detached();
    }
}
