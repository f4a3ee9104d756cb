// Contact status automaton
//
// A status is the pair (liveness, presentation). Liveness moves with
// heartbeats, presentation with selection and message traffic. Only the
// pairs listed in `ContactStatus::on` are legal; everything else is a
// rejected transition and leaves the contact untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactStatus {
    Active,
    Inactive,
    SelectedActive,
    SelectedInactive,
    UnreadActive,
    UnreadInactive,
    PendingInactive,
    SelectedPendingInactive,
}

/// Inputs of the automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusEvent {
    Activate,
    Deactivate,
    Send,
    Receive,
    SelectIn,
    SelectOut,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 8] = [
        ContactStatus::Active,
        ContactStatus::Inactive,
        ContactStatus::SelectedActive,
        ContactStatus::SelectedInactive,
        ContactStatus::UnreadActive,
        ContactStatus::UnreadInactive,
        ContactStatus::PendingInactive,
        ContactStatus::SelectedPendingInactive,
    ];

    /// Next status for `event`, or `None` when the pair is illegal.
    /// Returning `Some(self)` is a legal no-op.
    pub fn on(self, event: StatusEvent) -> Option<ContactStatus> {
        use ContactStatus::*;
        use StatusEvent::*;
        match (self, event) {
            (Active, Activate) => Some(Active),
            (Active, Deactivate) => Some(Inactive),
            (Active, Receive) => Some(UnreadActive),
            (Active, SelectIn) => Some(SelectedActive),

            (Inactive, Activate) => Some(Active),
            (Inactive, Deactivate) => Some(Inactive),
            (Inactive, SelectIn) => Some(SelectedInactive),

            (SelectedActive, Activate) => Some(SelectedActive),
            (SelectedActive, Deactivate) => Some(SelectedInactive),
            (SelectedActive, Send) => Some(SelectedActive),
            (SelectedActive, Receive) => Some(SelectedActive),
            (SelectedActive, SelectOut) => Some(Active),

            (SelectedInactive, Activate) => Some(SelectedActive),
            (SelectedInactive, Deactivate) => Some(SelectedInactive),
            (SelectedInactive, Send) => Some(PendingInactive),
            (SelectedInactive, SelectOut) => Some(Inactive),

            (UnreadActive, Activate) => Some(UnreadActive),
            (UnreadActive, Deactivate) => Some(UnreadInactive),
            (UnreadActive, Receive) => Some(UnreadActive),
            (UnreadActive, SelectIn) => Some(SelectedActive),

            (UnreadInactive, Activate) => Some(UnreadActive),
            (UnreadInactive, Deactivate) => Some(UnreadInactive),
            (UnreadInactive, SelectIn) => Some(SelectedInactive),

            (PendingInactive, Activate) => Some(Active),
            (PendingInactive, Deactivate) => Some(PendingInactive),
            (PendingInactive, SelectIn) => Some(SelectedPendingInactive),

            (SelectedPendingInactive, Activate) => Some(SelectedActive),
            (SelectedPendingInactive, Deactivate) => Some(SelectedPendingInactive),
            (SelectedPendingInactive, Send) => Some(SelectedPendingInactive),
            (SelectedPendingInactive, SelectOut) => Some(PendingInactive),

            _ => None,
        }
    }

    pub fn is_selected(self) -> bool {
        matches!(
            self,
            ContactStatus::SelectedActive
                | ContactStatus::SelectedInactive
                | ContactStatus::SelectedPendingInactive
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            ContactStatus::Active | ContactStatus::SelectedActive | ContactStatus::UnreadActive
        )
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContactStatus::Active => "ACTIVE",
            ContactStatus::Inactive => "INACTIVE",
            ContactStatus::SelectedActive => "SELECTED_ACTIVE",
            ContactStatus::SelectedInactive => "SELECTED_INACTIVE",
            ContactStatus::UnreadActive => "UNREAD_ACTIVE",
            ContactStatus::UnreadInactive => "UNREAD_INACTIVE",
            ContactStatus::PendingInactive => "PENDING_INACTIVE",
            ContactStatus::SelectedPendingInactive => "SELECTED_PENDING_INACTIVE",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::Activate => write!(f, "activate"),
            StatusEvent::Deactivate => write!(f, "deactivate"),
            StatusEvent::Send => write!(f, "send"),
            StatusEvent::Receive => write!(f, "receive"),
            StatusEvent::SelectIn => write!(f, "select-in"),
            StatusEvent::SelectOut => write!(f, "select-out"),
        }
    }
}
