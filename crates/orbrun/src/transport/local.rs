//! Local IPC over Unix domain sockets.

use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;

use super::BoxStream;
use super::Connector;
use super::Listener;
use super::PeerAddr;
use super::Result;

pub struct LocalListener {
    inner: tokio::net::UnixListener,
    path: PathBuf,
    accepted: AtomicU64,
}

impl LocalListener {
    /// Binds `path`, removing a stale socket file left by a previous run.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let inner = tokio::net::UnixListener::bind(&path)?;
        Ok(Self { inner, path, accepted: AtomicU64::new(0) })
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl Listener for LocalListener {
    async fn accept(&self) -> Result<(BoxStream, PeerAddr)> {
        let (stream, _) = self.inner.accept().await?;
        // Unix peers are anonymous; number them per listener.
        let n = self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok((Box::new(stream), PeerAddr(format!("local:{}#{}", self.path.display(), n))))
    }

    fn local_addr(&self) -> PeerAddr {
        PeerAddr(format!("local:{}", self.path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct LocalConnector {
    path: PathBuf,
}

impl LocalConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self) -> Result<(BoxStream, PeerAddr)> {
        let stream = tokio::net::UnixStream::connect(&self.path).await?;
        Ok((Box::new(stream), PeerAddr(format!("local:{}", self.path.display()))))
    }
}
