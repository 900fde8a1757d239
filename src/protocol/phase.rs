//! Protocol phases and their per-direction id tables.
//!
//! A connection is always in exactly one [`ProtocolPhase`]. The phase picks
//! which id table the codec consults, so the same numeric id can mean
//! different packets in different phases.
//!
//! ```text
//! Handshake ──┬──> Status          (one request/response, then closed)
//!             └──> Login ──> Play
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::packet::{Direction, PacketDescriptor};
use crate::error::{ProtocolError, Result};

/// Coarse-grained stage of a connection's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolPhase {
    Handshake,
    Status,
    Login,
    Play,
}

impl ProtocolPhase {
    pub const ALL: [ProtocolPhase; 4] = [
        ProtocolPhase::Handshake,
        ProtocolPhase::Status,
        ProtocolPhase::Login,
        ProtocolPhase::Play,
    ];

    /// Whether a connection may move from `self` to `next`.
    ///
    /// Re-entering the current phase is allowed and is a no-op for callers.
    pub fn can_transition_to(self, next: ProtocolPhase) -> bool {
        use ProtocolPhase::*;
        matches!(
            (self, next),
            (Handshake, Status) | (Handshake, Login) | (Login, Play)
        ) || self == next
    }

    /// Handshake intent value carried by the handshake packet
    pub fn from_intent(intent: i32) -> Option<Self> {
        match intent {
            1 => Some(ProtocolPhase::Status),
            2 => Some(ProtocolPhase::Login),
            _ => None,
        }
    }

    pub fn intent(self) -> Option<i32> {
        match self {
            ProtocolPhase::Status => Some(1),
            ProtocolPhase::Login => Some(2),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            ProtocolPhase::Handshake => 0,
            ProtocolPhase::Status => 1,
            ProtocolPhase::Login => 2,
            ProtocolPhase::Play => 3,
        }
    }
}

impl fmt::Display for ProtocolPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolPhase::Handshake => "handshake",
            ProtocolPhase::Status => "status",
            ProtocolPhase::Login => "login",
            ProtocolPhase::Play => "play",
        };
        f.write_str(name)
    }
}

/// The two independent id tables owned by one phase.
#[derive(Debug, Default, Clone)]
pub struct PhaseTable {
    inbound: HashMap<i32, Arc<PacketDescriptor>>,
    outbound: HashMap<i32, Arc<PacketDescriptor>>,
}

impl PhaseTable {
    fn table(&self, direction: Direction) -> &HashMap<i32, Arc<PacketDescriptor>> {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    /// Append a descriptor. Fails if its id is already bound for its direction.
    pub(crate) fn insert(&mut self, descriptor: Arc<PacketDescriptor>) -> Result<()> {
        let table = match descriptor.direction() {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        };
        if let Some(existing) = table.get(&descriptor.id()) {
            return Err(ProtocolError::DuplicateRegistration {
                phase: descriptor.phase(),
                direction: descriptor.direction(),
                id: descriptor.id(),
                existing: existing.name(),
            });
        }
        table.insert(descriptor.id(), descriptor);
        Ok(())
    }

    pub fn get(&self, direction: Direction, id: i32) -> Option<&Arc<PacketDescriptor>> {
        self.table(direction).get(&id)
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.table(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty()
    }

    /// Registered ids for `direction`, sorted ascending
    pub fn ids(&self, direction: Direction) -> Vec<i32> {
        let mut ids: Vec<i32> = self.table(direction).keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ProtocolPhase::*;
        assert!(Handshake.can_transition_to(Status));
        assert!(Handshake.can_transition_to(Login));
        assert!(Login.can_transition_to(Play));
        assert!(Play.can_transition_to(Play));
        assert!(!Status.can_transition_to(Play));
        assert!(!Play.can_transition_to(Login));
        assert!(!Login.can_transition_to(Handshake));
    }

    #[test]
    fn test_intent_mapping() {
        assert_eq!(ProtocolPhase::from_intent(1), Some(ProtocolPhase::Status));
        assert_eq!(ProtocolPhase::from_intent(2), Some(ProtocolPhase::Login));
        assert_eq!(ProtocolPhase::from_intent(3), None);
        assert_eq!(ProtocolPhase::Login.intent(), Some(2));
        assert_eq!(ProtocolPhase::Play.intent(), None);
    }

    #[test]
    fn test_indices_are_distinct() {
        let mut seen = [false; 4];
        for phase in ProtocolPhase::ALL {
            assert!(!seen[phase.index()]);
            seen[phase.index()] = true;
        }
    }
}
