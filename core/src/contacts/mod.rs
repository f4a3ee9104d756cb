// Contacts: who we know, how they are doing, and what the contacts view shows.

mod registry;
mod status;

pub use registry::ContactRegistry;
pub use status::{ContactStatus, StatusEvent};

use crate::LocalId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: LocalId,
    pub identity: String,
    pub nickname: String,
    /// `ip:port` the peer is reachable at.
    pub address: String,
    pub status: ContactStatus,
    pub sent_count: u64,
    pub received_count: u64,
}

impl Contact {
    pub fn new(id: LocalId, nickname: &str, identity: &str, address: &str) -> Self {
        Self {
            id,
            identity: identity.to_string(),
            nickname: nickname.to_string(),
            address: address.to_string(),
            status: ContactStatus::Active,
            sent_count: 0,
            received_count: 0,
        }
    }
}

/// Snapshot pushed to the contacts view after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: LocalId,
    pub nickname: String,
    pub status: ContactStatus,
    pub sent_count: u64,
    pub received_count: u64,
}

impl From<&Contact> for StatusUpdate {
    fn from(contact: &Contact) -> Self {
        Self {
            id: contact.id,
            nickname: contact.nickname.clone(),
            status: contact.status,
            sent_count: contact.sent_count,
            received_count: contact.received_count,
        }
    }
}

/// Frames on the local contacts channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactsFrame {
    Status(StatusUpdate),
    Heartbeat,
    Goodbye,
}

/// Contact bookkeeping as seen by discovery and the broadcaster.
///
/// Every mutating call returns `false` without touching state when the
/// request is illegal for the contact's current status.
#[cfg_attr(test, mockall::automock)]
pub trait Registry: Send + Sync {
    /// Append a new ACTIVE contact. Fails when `identity` is already known.
    fn create(&self, nickname: &str, identity: &str, address: &str) -> bool;
    fn activate(&self, id: LocalId) -> bool;
    fn deactivate(&self, id: LocalId) -> bool;
    fn send(&self, id: LocalId) -> bool;
    fn receive(&self, id: LocalId) -> bool;
    /// Move the selection to `id`. Both halves are checked before either applies.
    fn select(&self, id: LocalId) -> bool;
    fn get(&self, id: LocalId) -> Option<Contact>;
    fn lookup(&self, identity: &str) -> Option<LocalId>;
    fn current(&self) -> Option<LocalId>;
    fn size(&self) -> usize;
}
