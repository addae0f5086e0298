//! Status transition policies.

use super::models::NotificationStatus;

/// Decides whether the ledger may move a notification from `from` to `to`.
pub trait TransitionPolicy: Send + Sync {
    fn allows(&self, from: NotificationStatus, to: NotificationStatus) -> bool;
}

/// Any status may follow any other.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveTransitions;

impl TransitionPolicy for PermissiveTransitions {
    fn allows(&self, _from: NotificationStatus, _to: NotificationStatus) -> bool {
        true
    }
}

/// Only moves along PENDING -> SENT -> DELIVERED -> READ, skipping allowed.
/// FAILED is reachable from PENDING or SENT and is terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardOnlyTransitions;

impl ForwardOnlyTransitions {
    fn rank(status: NotificationStatus) -> Option<u8> {
        match status {
            NotificationStatus::Pending => Some(0),
            NotificationStatus::Sent => Some(1),
            NotificationStatus::Delivered => Some(2),
            NotificationStatus::Read => Some(3),
            NotificationStatus::Failed => None,
        }
    }
}

impl TransitionPolicy for ForwardOnlyTransitions {
    fn allows(&self, from: NotificationStatus, to: NotificationStatus) -> bool {
        match (Self::rank(from), Self::rank(to)) {
            (Some(from), Some(to)) => to > from,
            (Some(from), None) => from <= 1,
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NotificationStatus::*;

    #[test]
    fn permissive_allows_everything() {
        for from in NotificationStatus::ALL {
            for to in NotificationStatus::ALL {
                assert!(PermissiveTransitions.allows(from, to));
            }
        }
    }

    #[test]
    fn forward_only_allows_forward_moves() {
        let policy = ForwardOnlyTransitions;
        assert!(policy.allows(Pending, Sent));
        assert!(policy.allows(Pending, Delivered));
        assert!(policy.allows(Sent, Read));
        assert!(policy.allows(Delivered, Read));
        assert!(policy.allows(Pending, Failed));
        assert!(policy.allows(Sent, Failed));
    }

    #[test]
    fn forward_only_rejects_backward_and_terminal_moves() {
        let policy = ForwardOnlyTransitions;
        assert!(!policy.allows(Read, Sent));
        assert!(!policy.allows(Delivered, Pending));
        assert!(!policy.allows(Read, Read));
        assert!(!policy.allows(Delivered, Failed));
        assert!(!policy.allows(Failed, Sent));
        assert!(!policy.allows(Failed, Failed));
    }
}
