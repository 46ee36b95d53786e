use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::ToSocketAddrs;

use super::BoxStream;
use super::Connector;
use super::Listener;
use super::PeerAddr;
use super::Result;

pub struct TcpListener {
    inner: tokio::net::TcpListener,
    addr: SocketAddr,
}

impl TcpListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        let addr = inner.local_addr()?;
        Ok(Self { inner, addr })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Listener for TcpListener {
    async fn accept(&self) -> Result<(BoxStream, PeerAddr)> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), PeerAddr(format!("tcp:{}", addr))))
    }

    fn local_addr(&self) -> PeerAddr {
        PeerAddr(format!("tcp:{}", self.addr))
    }
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<(BoxStream, PeerAddr)> {
        let stream = tokio::net::TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), PeerAddr(format!("tcp:{}", self.addr))))
    }
}
