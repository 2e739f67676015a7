//! Byte stream transports.
//!
//! Associations only need a stream which can be read, written and shut down.
//! A [`Connector`] opens such streams to a host and port;
//! [`TcpConnector`] does so over TCP.
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// A source of transport streams to remote nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The stream type produced.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a stream to the given host and port.
    ///
    /// The connect timeout is applied by the caller.
    async fn connect(&self, host: &str, port: u16) -> std::io::Result<Self::Stream>;
}

/// Plain TCP transport, with Nagle's algorithm disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}:{} from {:?}", host, port, stream.local_addr().ok());
        Ok(stream)
    }
}
