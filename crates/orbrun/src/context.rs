//! Per-call context for objects that want to know who is calling.
//!
//! The context is bound only around the invocation of a context-aware
//! target, so concurrent calls never observe each other's context.

use std::future::Future;

use crate::channel::ChannelId;
use crate::transport::PeerAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub channel: ChannelId,
    pub peer: PeerAddr,
    pub call_id: u64,
}

tokio::task_local! {
    static CURRENT: CallContext;
}

/// The context of the call being dispatched, if any.
pub fn current() -> Option<CallContext> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

pub(crate) async fn scope<F: Future>(ctx: CallContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}
