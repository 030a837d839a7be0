use crate::identity::ClientIdentity;
use crate::stream::TrackingStream;
use crate::traffic_meter::TrafficMeter;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Source of accepted connections. Dropping the acceptor closes it.
#[async_trait]
pub trait Acceptor: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}

/// Acceptor that charges the traffic of every accepted connection to the
/// host of its peer address.
pub struct MeteringListener<A> {
    inner: A,
    meter: Arc<TrafficMeter>,
}

impl<A: Acceptor> MeteringListener<A> {
    pub fn new(inner: A, meter: Arc<TrafficMeter>) -> Self {
        Self { inner, meter }
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

#[async_trait]
impl<A: Acceptor> Acceptor for MeteringListener<A> {
    type Stream = TrackingStream<A::Stream>;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let (stream, peer_addr) = self.inner.accept().await?;
        let client = ClientIdentity::from_socket_addr(&peer_addr);
        debug!(%client, "Metering connection from {}", peer_addr);
        Ok((self.meter.track(stream, client), peer_addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeterConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    /// Hands out queued connections, then fails.
    struct QueuedAcceptor {
        queue: Mutex<VecDeque<(DuplexStream, SocketAddr)>>,
    }

    #[async_trait]
    impl Acceptor for QueuedAcceptor {
        type Stream = DuplexStream;

        async fn accept(&self) -> io::Result<(DuplexStream, SocketAddr)> {
            self.queue
                .lock()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "no more connections"))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:10800".parse().unwrap())
        }
    }

    #[tokio::test]
    async fn wraps_accepted_connections_per_host() {
        let (local, mut peer) = duplex(1024);
        let acceptor = QueuedAcceptor {
            queue: Mutex::new(VecDeque::from([(local, "10.0.0.1:40000".parse().unwrap())])),
        };
        let meter = Arc::new(TrafficMeter::new(MeterConfig::default()));
        let listener = MeteringListener::new(acceptor, meter.clone());

        let (mut stream, peer_addr) = listener.accept().await.unwrap();
        assert_eq!(peer_addr.port(), 40000);
        assert_eq!(stream.client().as_str(), "10.0.0.1");

        peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(meter.traffic_for("10.0.0.1").unwrap().read, 4);
    }

    #[tokio::test]
    async fn accept_errors_pass_through_unchanged() {
        let acceptor = QueuedAcceptor {
            queue: Mutex::new(VecDeque::new()),
        };
        let listener = MeteringListener::new(acceptor, Arc::new(TrafficMeter::default()));

        let err = listener.accept().await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert_eq!(
            listener.local_addr().unwrap(),
            "127.0.0.1:10800".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn meters_real_tcp_connections() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let meter = Arc::new(TrafficMeter::default());
        let listener = MeteringListener::new(tcp, meter.clone());
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut conn = TcpStream::connect(addr).await.unwrap();
            conn.write_all(b"hello").await.unwrap();
            let mut reply = [0u8; 3];
            conn.read_exact(&mut reply).await.unwrap();
            reply
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        stream.write_all(b"hey").await.unwrap();

        assert_eq!(&client.await.unwrap(), b"hey");
        let record = meter.traffic_for("127.0.0.1").unwrap();
        assert_eq!(record.read, 5);
        assert_eq!(record.written, 3);
        assert_eq!(meter.global_traffic(), 8);
    }
}
