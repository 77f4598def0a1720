//! Type-safe integer identifier wrappers.
//!
//! Every entity in the simulation has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. IDs are plain `u64`
//! values handed out by an [`IdSequence`] owned by whoever registers the
//! entity. Sequences are monotonic and never rewind, so an ID that belonged
//! to a removed entity can never alias a newly created one.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around `u64` with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw integer value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the inner integer value.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for an agent registered with the simulation world.
    AgentId
}

define_id! {
    /// Unique identifier for a harvestable resource node.
    ResourceNodeId
}

define_id! {
    /// Unique identifier for a formation managed by the coordinator.
    FormationId
}

define_id! {
    /// Unique identifier for a static obstacle in an obstacle field.
    ObstacleId
}

/// Monotonic source of identifiers.
///
/// The first ID handed out is `1`. The sequence never reuses a value; once
/// `u64::MAX` has been reached it is exhausted and [`IdSequence::next_id`]
/// returns `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    /// Create a sequence starting at `1`.
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Allocate the next identifier, or `None` if the sequence is exhausted.
    pub fn next_id<I: From<u64>>(&mut self) -> Option<I> {
        let current = self.next;
        self.next = current.checked_add(1)?;
        Some(I::from(current))
    }

    /// Peek at the value the next allocation will return.
    pub const fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let mut seq = IdSequence::new();
        let a: Option<AgentId> = seq.next_id();
        let b: Option<AgentId> = seq.next_id();
        assert_eq!(a, Some(AgentId(1)));
        assert_eq!(b, Some(AgentId(2)));
        assert_eq!(seq.peek(), 3);
    }

    #[test]
    fn sequence_exhaustion_returns_none() {
        let mut seq = IdSequence { next: u64::MAX };
        let last: Option<AgentId> = seq.next_id();
        assert!(last.is_none());
    }

    #[test]
    fn id_roundtrip_serde() {
        let original = ResourceNodeId(42);
        let json = serde_json::to_string(&original).ok();
        assert_eq!(json.as_deref(), Some("42"));
        let restored: Result<ResourceNodeId, _> = serde_json::from_str("42");
        assert_eq!(restored.ok(), Some(original));
    }

    #[test]
    fn id_display_matches_raw() {
        assert_eq!(FormationId(7).to_string(), "7");
    }
}
