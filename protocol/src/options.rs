//! # Node Options
//!
//! Runtime configuration for a [`crate::Murmur`] node. Every field has a
//! sensible default from [`crate::config`]; the `with_*` builders exist so
//! call sites read declaratively:
//!
//! ```no_run
//! use murmur_protocol::{Murmur, Options};
//!
//! let node = Murmur::create(
//!     "0.0.0.0:7946",
//!     Options::new()
//!         .with_seed(|| vec!["10.0.0.1:7946".to_string()])
//!         .with_on_join(|addr| println!("joined: {addr}")),
//! )
//! .unwrap();
//! # drop(node);
//! ```
//!
//! Callbacks are invoked from murmur's internal threads with no internal
//! locks held, so they may call back into the node freely. They should
//! still return promptly, since a slow callback stalls packet handling.

use std::sync::Arc;
use std::time::Duration;

use crate::config;
use crate::transport::Transport;

/// Membership event callback, invoked with the peer's address.
pub type EventHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// State update callback, invoked with `(peer address, key, value)`.
pub type UpdateHandler = Arc<dyn Fn(&str, &str, &[u8]) + Send + Sync>;

/// Supplies bootstrap addresses whenever the node knows no live peers.
pub type SeedProvider = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Tunable parameters for a murmur node.
///
/// Defaults suit a LAN cluster of tens of nodes. The values worth
/// revisiting in production are `max_message_size` (raise toward your path
/// MTU) and `down_grace_period` (match your restart window).
#[derive(Clone, Default)]
pub struct Options {
    /// Called when the node's view contains no live peers: at startup and
    /// again if the whole cluster drops away. Returns addresses to contact.
    /// Without one, the node waits passively to be contacted.
    pub seed: Option<SeedProvider>,

    /// Fired on the first observation of a peer, and again on each
    /// Down-to-Up recovery.
    pub on_join: Option<EventHandler>,

    /// Fired on each Up-to-Down transition.
    pub on_leave: Option<EventHandler>,

    /// Fired for every accepted remote state entry.
    pub on_update: Option<UpdateHandler>,

    /// Transport override. Defaults to UDP bound to the create address.
    pub transport: Option<Arc<dyn Transport>>,

    /// Time between gossip rounds.
    /// Defaults to [`config::DEFAULT_GOSSIP_INTERVAL`].
    pub gossip_interval: Option<Duration>,

    /// Cap on the encoded size of one datagram.
    /// Defaults to [`config::DEFAULT_MAX_MESSAGE_SIZE`].
    pub max_message_size: Option<usize>,

    /// Phi above which a peer is convicted as Down.
    /// Defaults to [`config::DEFAULT_CONVICTION_THRESHOLD`].
    pub conviction_threshold: Option<f64>,

    /// Inter-arrival samples kept per peer endpoint.
    /// Defaults to [`config::DEFAULT_FAILURE_SAMPLE_SIZE`].
    pub failure_sample_size: Option<usize>,

    /// How long a Down peer may stay unrecovered before eviction.
    /// Defaults to [`config::DEFAULT_DOWN_GRACE_PERIOD`].
    pub down_grace_period: Option<Duration>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: impl Fn() -> Vec<String> + Send + Sync + 'static) -> Self {
        self.seed = Some(Arc::new(seed));
        self
    }

    pub fn with_on_join(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_join = Some(Arc::new(cb));
        self
    }

    pub fn with_on_leave(mut self, cb: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_leave = Some(Arc::new(cb));
        self
    }

    pub fn with_on_update(mut self, cb: impl Fn(&str, &str, &[u8]) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(cb));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = Some(interval);
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    pub fn with_conviction_threshold(mut self, threshold: f64) -> Self {
        self.conviction_threshold = Some(threshold);
        self
    }

    pub fn with_failure_sample_size(mut self, samples: usize) -> Self {
        self.failure_sample_size = Some(samples);
        self
    }

    pub fn with_down_grace_period(mut self, grace: Duration) -> Self {
        self.down_grace_period = Some(grace);
        self
    }

    pub(crate) fn gossip_interval(&self) -> Duration {
        self.gossip_interval.unwrap_or(config::DEFAULT_GOSSIP_INTERVAL)
    }

    pub(crate) fn max_message_size(&self) -> usize {
        self.max_message_size.unwrap_or(config::DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub(crate) fn conviction_threshold(&self) -> f64 {
        self.conviction_threshold
            .unwrap_or(config::DEFAULT_CONVICTION_THRESHOLD)
    }

    pub(crate) fn failure_sample_size(&self) -> usize {
        self.failure_sample_size
            .unwrap_or(config::DEFAULT_FAILURE_SAMPLE_SIZE)
    }

    pub(crate) fn down_grace_period(&self) -> Duration {
        self.down_grace_period
            .unwrap_or(config::DEFAULT_DOWN_GRACE_PERIOD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_config() {
        let opts = Options::new();
        assert_eq!(opts.gossip_interval(), config::DEFAULT_GOSSIP_INTERVAL);
        assert_eq!(opts.max_message_size(), config::DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(
            opts.conviction_threshold(),
            config::DEFAULT_CONVICTION_THRESHOLD
        );
        assert_eq!(
            opts.failure_sample_size(),
            config::DEFAULT_FAILURE_SAMPLE_SIZE
        );
        assert_eq!(opts.down_grace_period(), config::DEFAULT_DOWN_GRACE_PERIOD);
    }

    #[test]
    fn builders_override_defaults() {
        let opts = Options::new()
            .with_gossip_interval(Duration::from_millis(100))
            .with_max_message_size(1_400)
            .with_conviction_threshold(12.0)
            .with_failure_sample_size(64)
            .with_down_grace_period(Duration::from_secs(5));

        assert_eq!(opts.gossip_interval(), Duration::from_millis(100));
        assert_eq!(opts.max_message_size(), 1_400);
        assert_eq!(opts.conviction_threshold(), 12.0);
        assert_eq!(opts.failure_sample_size(), 64);
        assert_eq!(opts.down_grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn callbacks_are_stored() {
        let opts = Options::new()
            .with_seed(Vec::new)
            .with_on_join(|_| {})
            .with_on_leave(|_| {})
            .with_on_update(|_, _, _| {});
        assert!(opts.seed.is_some());
        assert!(opts.on_join.is_some());
        assert!(opts.on_leave.is_some());
        assert!(opts.on_update.is_some());
    }
}
