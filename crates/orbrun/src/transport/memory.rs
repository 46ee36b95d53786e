//! In-process transport over `tokio::io::duplex`, used by tests and demos.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use super::BoxStream;
use super::Connector;
use super::Error;
use super::Listener;
use super::PeerAddr;
use super::Result;

const BUFFER: usize = 256 * 1024;

type Pending = (DuplexStream, PeerAddr);

/// Creates a named listener and a connector that dials it.
pub fn endpoint(name: &str) -> (MemoryListener, MemoryConnector) {
    let (tx, rx) = mpsc::channel(16);
    let listener = MemoryListener { name: name.to_string(), incoming: Mutex::new(rx) };
    let connector = MemoryConnector {
        name: name.to_string(),
        dial: tx,
        dialed: Arc::new(AtomicU64::new(0)),
    };
    (listener, connector)
}

pub struct MemoryListener {
    name: String,
    incoming: Mutex<mpsc::Receiver<Pending>>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<(BoxStream, PeerAddr)> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some((stream, peer)) => Ok((Box::new(stream), peer)),
            None => Err(Error::ConnectionLost("every connector was dropped".into())),
        }
    }

    fn local_addr(&self) -> PeerAddr {
        PeerAddr(format!("memory:{}", self.name))
    }
}

/// Cloneable; every clone dials the same listener.
#[derive(Clone)]
pub struct MemoryConnector {
    name: String,
    dial: mpsc::Sender<Pending>,
    dialed: Arc<AtomicU64>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<(BoxStream, PeerAddr)> {
        let (near, far) = tokio::io::duplex(BUFFER);
        let n = self.dialed.fetch_add(1, Ordering::Relaxed);
        let client = PeerAddr(format!("memory:{}#{}", self.name, n));
        self.dial
            .send((far, client))
            .await
            .map_err(|_| Error::ConnectionLost("listener was dropped".into()))?;
        Ok((Box::new(near), PeerAddr(format!("memory:{}", self.name))))
    }
}
