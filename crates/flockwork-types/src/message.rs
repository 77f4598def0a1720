//! Messages exchanged between agents and from the simulation to agents.
//!
//! A [`Message`] is immutable once built. The `with_*` methods consume the
//! message and return a modified copy, so a message that has been queued on
//! the bus can never change underneath its recipient. Payloads are a closed
//! tagged union ([`MessagePayload`]) over the kinds of data the simulation
//! actually exchanges.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::enums::MessageType;
use crate::ids::{AgentId, FormationId, ResourceNodeId};

/// Who a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageTarget {
    /// A single agent. Dropped if the agent no longer exists.
    Agent(AgentId),
    /// Every live agent.
    Broadcast,
}

/// Typed payload attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Refers to another agent (seek/flee/follow/attack target).
    Agent(AgentId),
    /// Refers to a resource node (gather orders, depletion notices).
    ResourceNode(ResourceNodeId),
    /// Refers to a formation.
    Formation(FormationId),
    /// Free-form text for application-defined messages.
    Text(String),
}

/// A single message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    kind: MessageType,
    sender: Option<AgentId>,
    target: MessageTarget,
    position: Option<Vec3>,
    value: Option<f32>,
    payload: Option<MessagePayload>,
    tag: Option<String>,
    created_at: f64,
}

impl Message {
    /// Create a system-originated broadcast message of the given type.
    ///
    /// Use the `with_*` builders to address, time-stamp, and fill it.
    pub const fn new(kind: MessageType) -> Self {
        Self {
            kind,
            sender: None,
            target: MessageTarget::Broadcast,
            position: None,
            value: None,
            payload: None,
            tag: None,
            created_at: 0.0,
        }
    }

    /// A `MoveTo` order for the given position.
    pub const fn move_to(position: Vec3) -> Self {
        Self::new(MessageType::MoveTo).with_position(position)
    }

    /// A `Stop` order.
    pub const fn stop() -> Self {
        Self::new(MessageType::Stop)
    }

    /// A `Seek` order toward a fixed point.
    pub const fn seek_point(position: Vec3) -> Self {
        Self::new(MessageType::Seek).with_position(position)
    }

    /// A `Flee` order away from a fixed point.
    pub const fn flee_from(position: Vec3) -> Self {
        Self::new(MessageType::Flee).with_position(position)
    }

    /// A `Follow` order naming the leader.
    pub fn follow(leader: AgentId) -> Self {
        Self::new(MessageType::Follow).with_payload(MessagePayload::Agent(leader))
    }

    /// A `FormationUpdate` carrying the slot's world position.
    pub fn formation_update(formation: FormationId, slot_position: Vec3) -> Self {
        Self::new(MessageType::FormationUpdate)
            .with_position(slot_position)
            .with_payload(MessagePayload::Formation(formation))
    }

    /// A `GatherResource` order naming the node.
    pub fn gather(node: ResourceNodeId) -> Self {
        Self::new(MessageType::GatherResource).with_payload(MessagePayload::ResourceNode(node))
    }

    /// A `ReturnToBase` order.
    pub const fn return_to_base() -> Self {
        Self::new(MessageType::ReturnToBase)
    }

    /// A `ResourceDepleted` notice for the node.
    pub fn resource_depleted(node: ResourceNodeId) -> Self {
        Self::new(MessageType::ResourceDepleted).with_payload(MessagePayload::ResourceNode(node))
    }

    /// A `Damage` message carrying the damage amount.
    pub const fn damage(amount: f32) -> Self {
        Self::new(MessageType::Damage).with_value(amount)
    }

    /// An application-defined message identified by `tag`.
    pub fn custom(tag: impl Into<String>) -> Self {
        Self::new(MessageType::Custom).with_tag(tag)
    }

    // -- builders ----------------------------------------------------------

    /// Set the sending agent (`None` means the system).
    #[must_use]
    pub const fn with_sender(mut self, sender: Option<AgentId>) -> Self {
        self.sender = sender;
        self
    }

    /// Set the recipient.
    #[must_use]
    pub const fn with_target(mut self, target: MessageTarget) -> Self {
        self.target = target;
        self
    }

    /// Attach a world-space position.
    #[must_use]
    pub const fn with_position(mut self, position: Vec3) -> Self {
        self.position = Some(position);
        self
    }

    /// Attach a scalar value.
    #[must_use]
    pub const fn with_value(mut self, value: f32) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach a typed payload.
    #[must_use]
    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach a string tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Stamp the creation time (simulation seconds).
    #[must_use]
    pub const fn at(mut self, created_at: f64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Copy this message for a different sender and recipient.
    ///
    /// Everything else, payload included, is preserved.
    #[must_use]
    pub fn clone_for(&self, sender: Option<AgentId>, target: MessageTarget) -> Self {
        self.clone().with_sender(sender).with_target(target)
    }

    // -- accessors ---------------------------------------------------------

    /// The message type tag.
    pub const fn kind(&self) -> MessageType {
        self.kind
    }

    /// The sending agent, or `None` for system messages.
    pub const fn sender(&self) -> Option<AgentId> {
        self.sender
    }

    /// The recipient.
    pub const fn target(&self) -> MessageTarget {
        self.target
    }

    /// Whether the message is addressed to every agent.
    pub const fn is_broadcast(&self) -> bool {
        matches!(self.target, MessageTarget::Broadcast)
    }

    /// The attached position, if any.
    pub const fn position(&self) -> Option<Vec3> {
        self.position
    }

    /// The attached scalar value, if any.
    pub const fn value(&self) -> Option<f32> {
        self.value
    }

    /// The attached payload, if any.
    pub const fn payload(&self) -> Option<&MessagePayload> {
        self.payload.as_ref()
    }

    /// The attached tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Creation timestamp in simulation seconds.
    pub const fn created_at(&self) -> f64 {
        self.created_at
    }

    /// The payload's agent reference, if the payload names an agent.
    pub const fn payload_agent(&self) -> Option<AgentId> {
        match self.payload {
            Some(MessagePayload::Agent(id)) => Some(id),
            _ => None,
        }
    }

    /// The payload's resource node reference, if the payload names one.
    pub const fn payload_resource_node(&self) -> Option<ResourceNodeId> {
        match self.payload {
            Some(MessagePayload::ResourceNode(id)) => Some(id),
            _ => None,
        }
    }

    /// The payload's formation reference, if the payload names one.
    pub const fn payload_formation(&self) -> Option<FormationId> {
        match self.payload {
            Some(MessagePayload::Formation(id)) => Some(id),
            _ => None,
        }
    }
}
