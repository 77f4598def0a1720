//! FIFO message bus with a per-tick delivery bound.
//!
//! Messages are delivered strictly in the order they were queued. Each tick
//! the simulation drains at most `max_messages_per_tick` of them; the rest
//! wait for the next tick. Messages produced while a tick is running are
//! queued behind everything already waiting, so a chain of replies can never
//! starve older traffic.

use std::collections::VecDeque;

use flockwork_types::{AgentId, Message, MessageTarget};
use serde::Serialize;
use tracing::{trace, warn};

/// Running totals kept by the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    /// Messages accepted onto the queue.
    pub sent: u64,
    /// Messages handed to at least one recipient.
    pub delivered: u64,
    /// Messages whose recipient no longer existed.
    pub dropped: u64,
    /// Accepted messages addressed to every agent.
    pub broadcasts: u64,
}

/// Result of handing one message to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message reached its recipient(s).
    Delivered,
    /// The addressed agent does not exist.
    Dropped,
}

/// The queue itself.
#[derive(Debug, Default)]
pub struct MessageBus {
    queue: VecDeque<Message>,
    stats: MessageStats,
}

impl MessageBus {
    /// Create an empty bus.
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            stats: MessageStats {
                sent: 0,
                delivered: 0,
                dropped: 0,
                broadcasts: 0,
            },
        }
    }

    /// Queue `message` for a single agent, overriding its target.
    pub fn send(&mut self, target: AgentId, message: Message) {
        self.enqueue(message.with_target(MessageTarget::Agent(target)));
    }

    /// Queue `message` for every live agent.
    pub fn broadcast(&mut self, message: Message) {
        self.enqueue(message.with_target(MessageTarget::Broadcast));
    }

    /// Queue an already addressed message.
    pub fn enqueue(&mut self, message: Message) {
        self.stats.sent = self.stats.sent.saturating_add(1);
        if message.is_broadcast() {
            self.stats.broadcasts = self.stats.broadcasts.saturating_add(1);
        }
        trace!(kind = ?message.kind(), target = ?message.target(), "Message queued");
        self.queue.push_back(message);
    }

    /// Number of messages waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Peek at the waiting messages in delivery order.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    /// Running totals.
    pub const fn stats(&self) -> MessageStats {
        self.stats
    }

    /// Drop every waiting message. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.queue.len();
        self.queue.clear();
        discarded
    }

    /// Pop up to `max` messages in FIFO order and hand each to `deliver`.
    ///
    /// Returns `(delivered, dropped)` for this call.
    pub fn process<F>(&mut self, max: usize, mut deliver: F) -> (usize, usize)
    where
        F: FnMut(Message) -> Delivery,
    {
        let budget = max.min(self.queue.len());
        let mut delivered: usize = 0;
        let mut dropped: usize = 0;
        for _ in 0..budget {
            let Some(message) = self.queue.pop_front() else {
                break;
            };
            match deliver(message) {
                Delivery::Delivered => {
                    delivered = delivered.saturating_add(1);
                    self.stats.delivered = self.stats.delivered.saturating_add(1);
                }
                Delivery::Dropped => {
                    dropped = dropped.saturating_add(1);
                    self.stats.dropped = self.stats.dropped.saturating_add(1);
                }
            }
        }
        if dropped > 0 {
            warn!(dropped, "Messages dropped for unknown recipients");
        }
        (delivered, dropped)
    }
}

#[cfg(test)]
mod tests {
    use flockwork_types::MessageType;
    use glam::Vec3;

    use super::*;

    fn numbered(n: u16) -> Message {
        Message::new(MessageType::Custom).with_value(f32::from(n))
    }

    #[test]
    fn delivery_is_fifo_and_bounded() {
        let mut bus = MessageBus::new();
        for n in 0..5 {
            bus.send(AgentId::from_raw(1), numbered(n));
        }

        let mut seen = Vec::new();
        let (delivered, dropped) = bus.process(3, |m| {
            seen.push(m.value());
            Delivery::Delivered
        });
        assert_eq!((delivered, dropped), (3, 0));
        assert_eq!(seen, vec![Some(0.0), Some(1.0), Some(2.0)]);
        assert_eq!(bus.len(), 2);

        seen.clear();
        bus.process(10, |m| {
            seen.push(m.value());
            Delivery::Delivered
        });
        assert_eq!(seen, vec![Some(3.0), Some(4.0)]);
        assert!(bus.is_empty());
    }

    #[test]
    fn send_and_broadcast_set_the_target() {
        let mut bus = MessageBus::new();
        bus.send(AgentId::from_raw(7), Message::stop());
        bus.broadcast(Message::move_to(Vec3::ONE).with_target(MessageTarget::Agent(AgentId::from_raw(2))));

        let targets: Vec<_> = bus.pending().map(Message::target).collect();
        assert_eq!(
            targets,
            vec![MessageTarget::Agent(AgentId::from_raw(7)), MessageTarget::Broadcast]
        );
        assert_eq!(bus.stats().sent, 2);
        assert_eq!(bus.stats().broadcasts, 1);
    }

    #[test]
    fn dropped_messages_are_counted() {
        let mut bus = MessageBus::new();
        bus.send(AgentId::from_raw(1), Message::stop());
        bus.send(AgentId::from_raw(2), Message::stop());
        let (delivered, dropped) = bus.process(10, |m| {
            if m.target() == MessageTarget::Agent(AgentId::from_raw(1)) {
                Delivery::Delivered
            } else {
                Delivery::Dropped
            }
        });
        assert_eq!((delivered, dropped), (1, 1));
        let stats = bus.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn zero_budget_delivers_nothing() {
        let mut bus = MessageBus::new();
        bus.broadcast(Message::stop());
        assert_eq!(bus.process(0, |_| Delivery::Delivered), (0, 0));
        assert_eq!(bus.len(), 1);
        assert_eq!(bus.clear(), 1);
    }
}
