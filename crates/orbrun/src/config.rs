//! Runtime configuration.

use std::sync::Arc;
use std::time::Duration;

use orbrpc::PackSerializer;
use orbrpc::Serializer;
use tracing::warn;

/// How long a removed instance stays reachable for calls already in flight.
pub const DEFAULT_REMOVAL_GRACE: Duration = Duration::from_secs(60);

pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct Config {
    /// Grace period applied to every `RemoveInstance` received from a peer.
    pub removal_grace: Duration,
    pub connect_timeout: Option<Duration>,
    /// Bound on each outbound call. `None` waits until the channel closes.
    pub call_timeout: Option<Duration>,
    /// Bound on the acknowledgement of the `RemoveInstance` a dropped proxy sends.
    pub release_timeout: Duration,
    /// Frames announcing a larger payload are a protocol violation.
    pub max_frame_len: usize,
    /// Period of the background purge. `None` purges on access only.
    pub sweep_interval: Option<Duration>,
    pub serializer: Arc<dyn Serializer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            removal_grace: DEFAULT_REMOVAL_GRACE,
            connect_timeout: None,
            call_timeout: None,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            sweep_interval: None,
            serializer: Arc::new(PackSerializer),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("removal_grace", &self.removal_grace)
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("release_timeout", &self.release_timeout)
            .field("max_frame_len", &self.max_frame_len)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Defaults overlaid with `ORB_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = parse(&lookup, "ORB_REMOVAL_GRACE_MS") {
            config.removal_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "ORB_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse(&lookup, "ORB_CALL_TIMEOUT_MS") {
            config.call_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = parse(&lookup, "ORB_SWEEP_INTERVAL_MS") {
            config = config.with_sweep_interval(Duration::from_millis(ms));
        }
        if let Some(len) = parse(&lookup, "ORB_MAX_FRAME_LEN") {
            config.max_frame_len = len as usize;
        }
        config
    }

    pub fn with_removal_grace(mut self, grace: Duration) -> Self {
        self.removal_grace = grace;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// A zero interval disables the background purge.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("zero sweep interval, purging on access only");
            self.sweep_interval = None;
        } else {
            self.sweep_interval = Some(interval);
        }
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = serializer;
        self
    }
}

fn parse(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key = key, value = %raw, error = %e, "ignoring unparsable setting");
            None
        }
    }
}
