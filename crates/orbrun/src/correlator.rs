//! # Call Correlator
//!
//! Matches responses to outstanding requests by call id.
//!
//! A waiter is registered before its request is written, so a response can
//! never arrive ahead of the waiter it belongs to.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use orbrpc::Message;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::CallFailure;

pub type Reply = Result<Message, CallFailure>;

/// Process-wide call id counter. Wraps on overflow; 0 is never handed out.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

fn next_call_id() -> u64 {
    loop {
        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

#[derive(Default)]
pub struct Correlator {
    pending: DashMap<u64, oneshot::Sender<Reply>>,
    closed: AtomicBool,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a call id and registers its waiter.
    pub fn register(&self) -> Result<(u64, oneshot::Receiver<Reply>), CallFailure> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallFailure::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        let id = loop {
            let id = next_call_id();
            // Skip ids still in flight after a wrap.
            if let Entry::Vacant(slot) = self.pending.entry(id) {
                slot.insert(tx);
                break id;
            }
        };

        // A concurrent `cancel_all` may have drained the table before the insert.
        if self.closed.load(Ordering::Acquire) {
            self.pending.remove(&id);
            return Err(CallFailure::Disconnected);
        }
        Ok((id, rx))
    }

    /// Delivers `reply` to the waiter for `call_id`.
    ///
    /// Returns `false` when no waiter exists: the call was already answered,
    /// timed out, or never issued here.
    pub fn resolve(&self, call_id: u64, reply: Reply) -> bool {
        match self.pending.remove(&call_id) {
            Some((_, tx)) => {
                // The caller may have given up; that is not an anomaly.
                let _ = tx.send(reply);
                true
            }
            None => {
                warn!(call_id, "response for unknown or already answered call, ignoring");
                false
            }
        }
    }

    /// Drops the waiter for `call_id` without answering it.
    pub fn forget(&self, call_id: u64) {
        self.pending.remove(&call_id);
    }

    /// Fails every outstanding call with `reason` and refuses new ones.
    pub fn cancel_all(&self, reason: CallFailure) -> usize {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(reason.clone()));
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_matches_by_id() {
        let correlator = Correlator::new();
        let (a, rx_a) = correlator.register().unwrap();
        let (b, rx_b) = correlator.register().unwrap();
        assert_ne!(a, b);
        assert_eq!(correlator.in_flight(), 2);

        assert!(correlator.resolve(b, Ok(Message::Ok { call_id: b })));
        assert!(correlator.resolve(a, Ok(Message::Ok { call_id: a })));

        assert_eq!(rx_a.await.unwrap().unwrap().call_id(), a);
        assert_eq!(rx_b.await.unwrap().unwrap().call_id(), b);
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register().unwrap();

        assert!(correlator.resolve(id, Ok(Message::Ok { call_id: id })));
        assert!(!correlator.resolve(id, Err(CallFailure::Cancelled)));

        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_all_releases_waiters() {
        let correlator = Correlator::new();
        let (_, rx1) = correlator.register().unwrap();
        let (_, rx2) = correlator.register().unwrap();

        assert_eq!(correlator.cancel_all(CallFailure::Disconnected), 2);
        assert_eq!(rx1.await.unwrap().unwrap_err(), CallFailure::Disconnected);
        assert_eq!(rx2.await.unwrap().unwrap_err(), CallFailure::Disconnected);

        match correlator.register() {
            Err(CallFailure::Disconnected) => {}
            other => panic!("expected Disconnected, got {:?}", other.map(|(id, _)| id)),
        }
    }

    #[test]
    fn test_call_ids_skip_zero() {
        NEXT_CALL_ID.store(u64::MAX, Ordering::Relaxed);
        let first = next_call_id();
        let second = next_call_id();
        assert_ne!(first, 0);
        assert_ne!(second, 0);
    }
}
