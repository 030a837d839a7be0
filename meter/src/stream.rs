use crate::error::MeterError;
use crate::identity::ClientIdentity;
use crate::traffic_meter::TrafficMeter;
use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::warn;

/// Protocol-level notice written to a peer before a rejected read fails.
pub trait RejectionReply: Send + Sync + 'static {
    fn frame(&self, error: &MeterError) -> Bytes;
}

/// Writes nothing; the rejected read only fails locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentRejection;

impl RejectionReply for SilentRejection {
    fn frame(&self, _error: &MeterError) -> Bytes {
        Bytes::new()
    }
}

struct Rejection {
    error: MeterError,
    frame: Bytes,
    flushed: bool,
}

impl Rejection {
    fn new(error: MeterError, frame: Bytes) -> Self {
        let flushed = frame.is_empty();
        Self {
            error,
            frame,
            flushed,
        }
    }

    /// Best effort: failures are logged and end the attempt.
    fn poll_send<S: AsyncWrite + Unpin>(
        &mut self,
        inner: &mut S,
        client: &ClientIdentity,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        while !self.frame.is_empty() {
            match ready!(Pin::new(&mut *inner).poll_write(cx, &self.frame)) {
                Ok(0) => {
                    warn!(%client, "Sending rejection reply failed: peer closed");
                    self.frame.clear();
                    self.flushed = true;
                }
                Ok(n) => self.frame.advance(n),
                Err(e) => {
                    warn!(%client, "Sending rejection reply failed: {}", e);
                    self.frame.clear();
                    self.flushed = true;
                }
            }
        }
        if !self.flushed {
            if let Err(e) = ready!(Pin::new(&mut *inner).poll_flush(cx)) {
                warn!(%client, "Flushing rejection reply failed: {}", e);
            }
            self.flushed = true;
        }
        Poll::Ready(())
    }
}

/// A stream whose traffic is charged to one client.
///
/// Every read is admitted by the meter's threshold policy before the inner
/// stream is touched. A rejected read writes the rejection reply to the inner
/// stream and fails with an `io::Error` wrapping the [`MeterError`]. Writes
/// are never gated, only counted. They wait until a pending rejection reply
/// has been sent, so relayed bytes never split it.
pub struct TrackingStream<S> {
    inner: S,
    client: ClientIdentity,
    meter: Arc<TrafficMeter>,
    rejected: Option<Rejection>,
}

impl<S> TrackingStream<S> {
    pub fn new(inner: S, client: ClientIdentity, meter: Arc<TrafficMeter>) -> Self {
        Self {
            inner,
            client,
            meter,
            rejected: None,
        }
    }

    pub fn client(&self) -> &ClientIdentity {
        &self.client
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for TrackingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.rejected.is_none() {
            let decision = this.meter.admit(&this.client);
            if let Some(error) = this.meter.rejection_error(decision, &this.client) {
                warn!(client = %this.client, "Rejecting read: {}", error);
                let frame = this.meter.rejection_frame(&error);
                this.rejected = Some(Rejection::new(error, frame));
            }
        }

        if let Some(rejection) = this.rejected.as_mut() {
            ready!(rejection.poll_send(&mut this.inner, &this.client, cx));
            // Taken so the next read checks the thresholds again.
            if let Some(rejection) = this.rejected.take() {
                return Poll::Ready(Err(io::Error::other(rejection.error)));
            }
        }

        let filled_before = buf.filled().len();
        let result = ready!(Pin::new(&mut this.inner).poll_read(cx, buf));
        let transferred = buf.filled().len() - filled_before;
        if transferred > 0 {
            this.meter
                .usage()
                .record_read(&this.client, transferred as u64);
        }
        Poll::Ready(result)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TrackingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // A half-sent rejection reply goes out before any relayed bytes.
        if let Some(rejection) = this.rejected.as_mut() {
            ready!(rejection.poll_send(&mut this.inner, &this.client, cx));
        }
        let result = ready!(Pin::new(&mut this.inner).poll_write(cx, buf));
        if let Ok(n) = result
            && n > 0
        {
            this.meter.usage().record_write(&this.client, n as u64);
        }
        Poll::Ready(result)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
