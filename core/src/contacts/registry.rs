// Contact registry
//
// Dense contact array plus an identity index. Every successful change is
// pushed to the contacts view while the write lock is held, so the view
// sees updates in the same order the state changed.

use super::{Contact, ContactStatus, ContactsFrame, Registry, StatusEvent, StatusUpdate};
use crate::shutdown::Stopper;
use crate::LocalId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn, Span};

#[derive(Default)]
struct RegistryState {
    contacts: Vec<Contact>,
    identities: HashMap<String, LocalId>,
    selected: Option<LocalId>,
}

pub struct ContactRegistry {
    state: RwLock<RegistryState>,
    updates: UnboundedSender<ContactsFrame>,
    stopper: Stopper,
    span: Span,
}

impl ContactRegistry {
    pub fn new(updates: UnboundedSender<ContactsFrame>, stopper: Stopper, span: Span) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            updates,
            stopper,
            span,
        }
    }

    /// Snapshot of every contact in id order.
    pub fn contacts(&self) -> Vec<Contact> {
        self.state.read().contacts.clone()
    }

    fn emit(&self, contact: &Contact) -> bool {
        let frame = ContactsFrame::Status(StatusUpdate::from(contact));
        if self.updates.send(frame).is_err() {
            error!("Contacts view queue closed, stopping");
            self.stopper.stop();
            return false;
        }
        true
    }

    fn transition(&self, id: LocalId, event: StatusEvent) -> bool {
        let _span = self.span.enter();
        let mut state = self.state.write();
        let displayed = state.selected == Some(id);
        let Some(contact) = state.contacts.get_mut(id) else {
            debug!("Ignoring {} for unknown contact {}", event, id);
            return false;
        };
        let mut status = contact.status;
        // An offline send leaves the displayed contact PENDING_INACTIVE,
        // outside the selected statuses. Any later use selects it again.
        if displayed && !status.is_selected() && event != StatusEvent::Deactivate {
            if let Some(reselected) = status.on(StatusEvent::SelectIn) {
                status = reselected;
            }
        }
        let Some(next) = status.on(event) else {
            warn!("Illegal {} for contact {} in {}", event, id, contact.status);
            return false;
        };
        let counted = match event {
            StatusEvent::Send => {
                contact.sent_count += 1;
                true
            }
            StatusEvent::Receive => {
                contact.received_count += 1;
                true
            }
            _ => false,
        };
        if next == contact.status && !counted {
            return true;
        }
        debug!("Contact {} {} -> {} on {}", id, contact.status, next, event);
        contact.status = next;
        let snapshot = contact.clone();
        self.emit(&snapshot)
    }
}

impl Registry for ContactRegistry {
    fn create(&self, nickname: &str, identity: &str, address: &str) -> bool {
        let _span = self.span.enter();
        let mut state = self.state.write();
        if state.identities.contains_key(identity) {
            warn!("Contact {} already exists", identity);
            return false;
        }
        let id = state.contacts.len();
        let contact = Contact::new(id, nickname, identity, address);
        state.identities.insert(identity.to_string(), id);
        state.contacts.push(contact.clone());
        info!("Created contact {} ({}) at {} as {}", nickname, identity, address, id);
        self.emit(&contact)
    }

    fn activate(&self, id: LocalId) -> bool {
        self.transition(id, StatusEvent::Activate)
    }

    fn deactivate(&self, id: LocalId) -> bool {
        self.transition(id, StatusEvent::Deactivate)
    }

    fn send(&self, id: LocalId) -> bool {
        self.transition(id, StatusEvent::Send)
    }

    fn receive(&self, id: LocalId) -> bool {
        self.transition(id, StatusEvent::Receive)
    }

    fn select(&self, id: LocalId) -> bool {
        let _span = self.span.enter();
        let mut state = self.state.write();
        let Some(target) = state.contacts.get(id).map(|c| c.status) else {
            debug!("Ignoring select of unknown contact {}", id);
            return false;
        };
        let Some(selected) = target.on(StatusEvent::SelectIn) else {
            warn!("Contact {} cannot be selected in {}", id, target);
            return false;
        };
        let deselected = match state.selected {
            Some(previous) => {
                let status = state.contacts[previous].status;
                match status.on(StatusEvent::SelectOut) {
                    Some(next) => Some((previous, next)),
                    // already shown as unselected after an offline send
                    None if !status.is_selected() => None,
                    None => {
                        error!("Selected contact {} cannot be deselected in {}", previous, status);
                        return false;
                    }
                }
            }
            None => None,
        };

        let mut changed = Vec::with_capacity(2);
        if let Some((previous, next)) = deselected {
            state.contacts[previous].status = next;
            changed.push(state.contacts[previous].clone());
        }
        state.contacts[id].status = selected;
        state.selected = Some(id);
        changed.push(state.contacts[id].clone());

        info!("Selected contact {}", id);
        changed.iter().all(|contact| self.emit(contact))
    }

    fn get(&self, id: LocalId) -> Option<Contact> {
        self.state.read().contacts.get(id).cloned()
    }

    fn lookup(&self, identity: &str) -> Option<LocalId> {
        self.state.read().identities.get(identity).copied()
    }

    fn current(&self) -> Option<LocalId> {
        self.state.read().selected
    }

    fn size(&self) -> usize {
        self.state.read().contacts.len()
    }
}

impl ContactRegistry {
    /// Number of contacts currently in a selected status.
    pub fn selected_count(&self) -> usize {
        self.state
            .read()
            .contacts
            .iter()
            .filter(|c| c.status.is_selected())
            .count()
    }

    /// Status of `id`, if known.
    pub fn status(&self, id: LocalId) -> Option<ContactStatus> {
        self.state.read().contacts.get(id).map(|c| c.status)
    }
}
