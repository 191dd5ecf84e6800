//! hyper connector dialing through a tunnel session or plain TCP

use crate::tls::direct_client_config;
use crate::transport::{PoolSettings, Transport};
use exchange_tunnel::{BoxedStream, Dialer};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tower::Service;
use tracing::debug;

#[derive(Clone, Debug)]
enum Route {
    Tunnel(Dialer),
    Direct,
}

/// Opens connections for one exchange, wrapping them in TLS for `https`/`wss`
#[derive(Clone)]
pub struct ExchangeConnector {
    route: Route,
    tls_config: Arc<ClientConfig>,
    handshake_timeout: Duration,
}

impl ExchangeConnector {
    /// Connector for a tunneled transport, or direct dialing when there is none
    pub fn for_transport(transport: Option<&Transport>) -> Result<Self, rustls::Error> {
        Ok(match transport {
            Some(transport) => Self {
                route: Route::Tunnel(transport.dialer().clone()),
                tls_config: transport.tls_config().clone(),
                handshake_timeout: transport.pool().tls_handshake_timeout,
            },
            None => Self {
                route: Route::Direct,
                tls_config: direct_client_config()?,
                handshake_timeout: PoolSettings::default().tls_handshake_timeout,
            },
        })
    }

    pub fn is_tunneled(&self) -> bool {
        matches!(self.route, Route::Tunnel(_))
    }

    async fn connect(self, uri: Uri) -> io::Result<ExchangeStream> {
        let secure = matches!(uri.scheme_str(), Some("https") | Some("wss"));
        let host = uri.host().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("missing host in {}", uri),
            )
        })?;
        let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });
        let bare_host = host.trim_start_matches('[').trim_end_matches(']');
        let addr = if bare_host.contains(':') {
            format!("[{}]:{}", bare_host, port)
        } else {
            format!("{}:{}", bare_host, port)
        };

        let stream: BoxedStream = match &self.route {
            Route::Tunnel(dialer) => {
                debug!(cluster = %dialer.cluster_id(), %addr, "Dialing through tunnel");
                dialer.dial(&addr).await?
            }
            Route::Direct => {
                debug!(%addr, "Dialing directly");
                let tcp = TcpStream::connect(&addr).await?;
                tcp.set_nodelay(true)?;
                Box::new(tcp)
            }
        };

        if !secure {
            return Ok(ExchangeStream::new(stream));
        }

        let server_name = ServerName::try_from(bare_host.to_string())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let connector = TlsConnector::from(self.tls_config.clone());
        let handshake = connector.connect(server_name, stream);
        let tls_stream = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("TLS handshake with {} timed out", addr),
                )
            })??;

        Ok(ExchangeStream::new(Box::new(tls_stream)))
    }
}

impl Service<Uri> for ExchangeConnector {
    type Response = ExchangeStream;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<ExchangeStream>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        Box::pin(self.clone().connect(uri))
    }
}

/// Connection handed to hyper
pub struct ExchangeStream(TokioIo<BoxedStream>);

impl ExchangeStream {
    fn new(stream: BoxedStream) -> Self {
        Self(TokioIo::new(stream))
    }
}

impl Connection for ExchangeStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for ExchangeStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.0), cx, buf)
    }
}

impl hyper::rt::Write for ExchangeStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.0), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.0), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.0), cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use exchange_tunnel::Dial;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Records dialed addresses and answers with one end of a duplex pipe
    #[derive(Default)]
    struct Recorder {
        addrs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dial for Recorder {
        async fn dial(&self, addr: &str) -> io::Result<BoxedStream> {
            self.addrs.lock().unwrap().push(addr.to_string());
            let (client, mut server) = tokio::io::duplex(64);
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                if server.read_exact(&mut buf).await.is_ok() {
                    let _ = server.write_all(&buf).await;
                }
            });
            Ok(Box::new(client))
        }
    }

    #[tokio::test]
    async fn test_tunnel_route_uses_dialer_with_default_port() {
        let recorder = Arc::new(Recorder::default());
        let transport = Transport::tunneled(Dialer::new("c1", recorder.clone())).unwrap();
        let mut connector = ExchangeConnector::for_transport(Some(&transport)).unwrap();
        assert!(connector.is_tunneled());

        let stream = connector
            .call("http://10.0.0.1/api".parse().unwrap())
            .await
            .unwrap();
        let mut io = stream.0.into_inner();
        io.write_all(b"ping").await.unwrap();
        let mut echo = [0u8; 4];
        io.read_exact(&mut echo).await.unwrap();

        assert_eq!(&echo, b"ping");
        assert_eq!(recorder.addrs.lock().unwrap().as_slice(), ["10.0.0.1:80"]);
    }

    #[tokio::test]
    async fn test_explicit_port_and_ipv6() {
        let recorder = Arc::new(Recorder::default());
        let transport = Transport::tunneled(Dialer::new("c1", recorder.clone())).unwrap();
        let mut connector = ExchangeConnector::for_transport(Some(&transport)).unwrap();

        for uri in ["http://svc:8080/", "http://[::1]:9090/"] {
            connector.call(uri.parse().unwrap()).await.unwrap();
        }

        assert_eq!(
            recorder.addrs.lock().unwrap().as_slice(),
            ["svc:8080", "[::1]:9090"]
        );
    }

    #[test]
    fn test_direct_route_without_transport() {
        let connector = ExchangeConnector::for_transport(None).unwrap();
        assert!(!connector.is_tunneled());
    }
}
