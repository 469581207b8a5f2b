//! Publish/subscribe routing.
//!
//! Channels and patterns each map to a bounded `broadcast` channel. The
//! bound is the subscriber inbox: a publisher never blocks, and a
//! subscriber that falls behind loses the overwritten messages (the drop is
//! not reported to the publisher). Within one channel, delivery order
//! equals publish order.

use crate::pattern::glob_match;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Bounded inbox capacity per channel.
const CHANNEL_CAPACITY: usize = 1024;

/// A message delivered to a subscriber.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    /// The channel the message was published to
    pub channel: Bytes,
    /// The message payload
    pub message: Bytes,
    /// The pattern that matched, for pattern subscriptions
    pub pattern: Option<Bytes>,
}

/// Pub/sub hub managing all subscriptions and fan-out.
#[derive(Debug)]
pub struct PubSubHub {
    /// Channel name -> broadcast sender
    channels: DashMap<Bytes, broadcast::Sender<PubSubMessage>>,
    /// Pattern -> broadcast sender
    patterns: DashMap<Bytes, broadcast::Sender<PubSubMessage>>,
}

impl PubSubHub {
    /// Create a new hub.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            patterns: DashMap::new(),
        }
    }

    /// Subscribe to a channel. Returns the message receiver.
    pub fn subscribe(&self, channel: Bytes) -> broadcast::Receiver<PubSubMessage> {
        self.channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop one subscription to a channel. The sender is removed once no
    /// receivers remain.
    pub fn unsubscribe(&self, channel: &Bytes) {
        if let Some(entry) = self.channels.get(channel) {
            if entry.receiver_count() <= 1 {
                drop(entry);
                self.channels.remove(channel);
            }
        }
    }

    /// Subscribe to a pattern. Returns the message receiver.
    pub fn psubscribe(&self, pattern: Bytes) -> broadcast::Receiver<PubSubMessage> {
        self.patterns
            .entry(pattern)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop one subscription to a pattern.
    pub fn punsubscribe(&self, pattern: &Bytes) {
        if let Some(entry) = self.patterns.get(pattern) {
            if entry.receiver_count() <= 1 {
                drop(entry);
                self.patterns.remove(pattern);
            }
        }
    }

    /// Publish a message. Returns the number of subscribers the message was
    /// handed to (exact-channel receivers plus matching pattern receivers).
    pub fn publish(&self, channel: Bytes, message: Bytes) -> usize {
        let mut count = 0;

        if let Some(sender) = self.channels.get(&channel) {
            let msg = PubSubMessage {
                channel: channel.clone(),
                message: message.clone(),
                pattern: None,
            };
            if sender.send(msg).is_ok() {
                count += sender.receiver_count();
            }
        }

        for entry in self.patterns.iter() {
            if glob_match(entry.key(), &channel) {
                let msg = PubSubMessage {
                    channel: channel.clone(),
                    message: message.clone(),
                    pattern: Some(entry.key().clone()),
                };
                if entry.value().send(msg).is_ok() {
                    count += entry.value().receiver_count();
                }
            }
        }

        count
    }

    /// Subscriber count for a channel (PUBSUB NUMSUB).
    pub fn numsub(&self, channel: &Bytes) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Count of distinct active patterns (PUBSUB NUMPAT).
    pub fn numpat(&self) -> usize {
        self.patterns.len()
    }

    /// Active channels, optionally filtered by pattern (PUBSUB CHANNELS).
    pub fn channels(&self, pattern: Option<&[u8]>) -> Vec<Bytes> {
        self.channels
            .iter()
            .filter(|entry| entry.value().receiver_count() > 0)
            .filter(|entry| pattern.map(|p| glob_match(p, entry.key())).unwrap_or(true))
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared pub/sub hub type.
pub type SharedPubSubHub = Arc<PubSubHub>;
