//! Stream factories.
//!
//! Socket construction proper stays outside the core: the dispatchers
//! only need something that can produce byte streams. [`Connect`] is
//! the client-side factory (invoked lazily, and again after a broken
//! connection); [`Accept`] is the server-side producer. Thin TCP
//! adapters are provided for both.

use std::future::Future;

use milan_wire::Result;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

/// Client-side stream factory.
pub trait Connect: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Server-side stream producer.
pub trait Accept: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn accept(&mut self) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// Connects a fresh TCP stream per call.
pub struct TcpConnect {
    addr: String,
}

impl TcpConnect {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnect { addr: addr.into() }
    }
}

impl Connect for TcpConnect {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Accepts connections from a bound TCP listener.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(TcpAcceptor {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl Accept for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<TcpStream> {
        let (stream, _) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
