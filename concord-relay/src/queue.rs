use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Undelivered messages are dropped five minutes after they were enqueued.
pub const MSG_TTL_MS: i64 = 5 * 60 * 1000;

/// Per-recipient queue cap. The oldest message is evicted on overflow.
pub const MSG_MAX_PER_PEER: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub from: String,
    pub channel_id: String,
    pub data: String,
    pub ts: i64,
}

/// Store-and-forward queue for peers the sender could not reach directly.
///
/// Delivery is at-most-once relative to a successful poll: `drain` consumes
/// the recipient's queue, so messages lost between the HTTP response and the
/// client processing it are gone. Callers deduplicate at application level.
#[derive(Debug, Default)]
pub struct MessageQueue {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, to: &str, from: &str, channel_id: &str, data: &str, now_ms: i64) {
        let queue = self.queues.entry(to.to_string()).or_default();
        queue.push_back(QueuedMessage {
            from: from.to_string(),
            channel_id: channel_id.to_string(),
            data: data.to_string(),
            ts: now_ms,
        });
        while queue.len() > MSG_MAX_PER_PEER {
            queue.pop_front();
        }
    }

    /// Return every live message newer than `since_ms` for the recipient and
    /// clear their queue. The `since_ms` filter sits on top of the clear;
    /// callers typically pass 0.
    pub fn drain(&mut self, peer_id: &str, since_ms: i64, now_ms: i64) -> Vec<QueuedMessage> {
        match self.queues.remove(peer_id) {
            Some(queue) => queue
                .into_iter()
                .filter(|msg| msg.ts > since_ms && now_ms - msg.ts < MSG_TTL_MS)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drop expired messages; recipients whose queues empty out are removed.
    pub fn sweep(&mut self, now_ms: i64) {
        self.queues.retain(|_, queue| {
            queue.retain(|msg| now_ms - msg.ts < MSG_TTL_MS);
            !queue.is_empty()
        });
    }

    /// Number of recipients with at least one queued message.
    pub fn recipients(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_messages_in_enqueue_order() {
        let mut queue = MessageQueue::new();
        queue.enqueue("bob", "alice", "general", "first", 1);
        queue.enqueue("bob", "alice", "general", "second", 2);
        queue.enqueue("bob", "carol", "general", "third", 3);

        let drained = queue.drain("bob", 0, 10);
        let bodies: Vec<&str> = drained.iter().map(|m| m.data.as_str()).collect();
        assert_eq!(bodies, ["first", "second", "third"]);
    }

    #[test]
    fn drain_is_destructive() {
        let mut queue = MessageQueue::new();
        queue.enqueue("bob", "alice", "general", "ping", 1);

        assert_eq!(queue.drain("bob", 0, 10).len(), 1);
        assert!(queue.drain("bob", 0, 10).is_empty());
    }

    #[test]
    fn drain_filters_by_since() {
        let mut queue = MessageQueue::new();
        queue.enqueue("bob", "alice", "general", "old", 5);
        queue.enqueue("bob", "alice", "general", "new", 15);

        let drained = queue.drain("bob", 10, 20);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].data, "new");
    }

    #[test]
    fn expired_messages_never_appear_in_drain() {
        let mut queue = MessageQueue::new();
        queue.enqueue("bob", "alice", "general", "stale", 0);

        assert!(queue.drain("bob", 0, MSG_TTL_MS + 1_000).is_empty());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut queue = MessageQueue::new();
        for i in 1..=205 {
            queue.enqueue("bob", "alice", "general", &format!("msg-{i}"), i as i64);
        }

        let drained = queue.drain("bob", 0, 250);
        assert_eq!(drained.len(), MSG_MAX_PER_PEER);
        assert_eq!(drained.first().unwrap().data, "msg-6");
        assert_eq!(drained.last().unwrap().data, "msg-205");
    }

    #[test]
    fn sweep_drops_expired_and_empty_recipients() {
        let mut queue = MessageQueue::new();
        queue.enqueue("bob", "alice", "general", "stale", 0);
        queue.enqueue("carol", "alice", "general", "fresh", MSG_TTL_MS);

        queue.sweep(MSG_TTL_MS + 1);
        assert_eq!(queue.recipients(), 1);
        assert_eq!(queue.drain("carol", 0, MSG_TTL_MS + 1).len(), 1);
    }
}
