//! Fulfillment run state machine.

use serde::{Deserialize, Serialize};

/// Why a run ended in [`FulfillmentState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    Unverified,
    MetadataCorrupt,
    StorageError,
    ProviderError,
    DedupError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Unverified => "unverified",
            FailureReason::MetadataCorrupt => "metadata_corrupt",
            FailureReason::StorageError => "storage_error",
            FailureReason::ProviderError => "provider_error",
            FailureReason::DedupError => "dedup_error",
        }
    }
}

/// The state of a fulfillment run.
///
/// State transitions:
/// ```text
/// Verified ──► Claimed ──► Reconstructed ──► Committed ──► SideEffectsDispatched ──► Done
///    │            │             │
///    └────────────┴─────────────┴──► Failed(reason)
/// Claimed ──► Done   (already processed, or order already exists)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FulfillmentState {
    /// Signature checked, payload parsed.
    #[default]
    Verified,

    /// Exclusive processing rights held for the event.
    Claimed,

    /// Priced lines rebuilt from the session.
    Reconstructed,

    /// Order, items and cart clear are durable.
    Committed,

    /// Inventory and email effects have been attempted.
    SideEffectsDispatched,

    /// Nothing left to do (terminal state).
    Done,

    /// Stopped before commit (terminal state).
    Failed(FailureReason),
}

impl FulfillmentState {
    /// Returns true if moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: FulfillmentState) -> bool {
        use FulfillmentState::*;
        match (self, next) {
            (Verified, Claimed) => true,
            (Claimed, Reconstructed) => true,
            (Reconstructed, Committed) => true,
            (Committed, SideEffectsDispatched) => true,
            (SideEffectsDispatched, Done) => true,
            // Duplicate event or order that already exists.
            (Claimed, Done) | (Reconstructed, Done) => true,
            (Verified | Claimed | Reconstructed, Failed(_)) => true,
            _ => false,
        }
    }

    /// Returns true once the order is durable. A committed run never fails.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            FulfillmentState::Committed | FulfillmentState::SideEffectsDispatched
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FulfillmentState::Done | FulfillmentState::Failed(_))
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentState::Verified => "Verified",
            FulfillmentState::Claimed => "Claimed",
            FulfillmentState::Reconstructed => "Reconstructed",
            FulfillmentState::Committed => "Committed",
            FulfillmentState::SideEffectsDispatched => "SideEffectsDispatched",
            FulfillmentState::Done => "Done",
            FulfillmentState::Failed(_) => "Failed",
        }
    }
}

impl std::fmt::Display for FulfillmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FulfillmentState::Failed(reason) => write!(f, "Failed({})", reason.as_str()),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_verified() {
        assert_eq!(FulfillmentState::default(), FulfillmentState::Verified);
    }

    #[test]
    fn test_happy_path_transitions() {
        use FulfillmentState::*;
        let path = [
            Verified,
            Claimed,
            Reconstructed,
            Committed,
            SideEffectsDispatched,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_only_reachable_before_commit() {
        use FulfillmentState::*;
        let failed = Failed(FailureReason::StorageError);
        assert!(Verified.can_transition_to(failed));
        assert!(Claimed.can_transition_to(failed));
        assert!(Reconstructed.can_transition_to(failed));
        assert!(!Committed.can_transition_to(failed));
        assert!(!SideEffectsDispatched.can_transition_to(failed));
        assert!(!Done.can_transition_to(failed));
    }

    #[test]
    fn test_no_skipping_commit() {
        use FulfillmentState::*;
        assert!(!Claimed.can_transition_to(Committed));
        assert!(!Reconstructed.can_transition_to(SideEffectsDispatched));
        assert!(!Done.can_transition_to(Verified));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!FulfillmentState::Committed.is_terminal());
        assert!(FulfillmentState::Done.is_terminal());
        assert!(FulfillmentState::Failed(FailureReason::MetadataCorrupt).is_terminal());
        assert!(FulfillmentState::Committed.is_committed());
        assert!(!FulfillmentState::Done.is_committed());
    }

    #[test]
    fn test_display() {
        assert_eq!(FulfillmentState::Claimed.to_string(), "Claimed");
        assert_eq!(
            FulfillmentState::Failed(FailureReason::MetadataCorrupt).to_string(),
            "Failed(metadata_corrupt)"
        );
    }

    #[test]
    fn test_serialization() {
        let state = FulfillmentState::Failed(FailureReason::ProviderError);
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: FulfillmentState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
