// Neighbor protocol
//
// Four calls between nodes: Greet introduces a node, Heartbeat probes
// liveness, Tell carries one chat message and Narrate carries a batch.

mod codec;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_frame, write_frame,
    MAX_FRAME_SIZE,
};

use serde::{Deserialize, Serialize};

/// Self description a node sends when greeting and answers a greet with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetRequest {
    pub nickname: String,
    pub identity: String,
    pub address: String,
}

/// Responder's own self contact.
pub type GreetReply = GreetRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReply {
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TellRequest {
    pub identity: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TellReply {
    pub identity: String,
}

/// Batch of messages. All entries must carry the same identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrateRequest {
    pub messages: Vec<TellRequest>,
}

impl NarrateRequest {
    pub fn new(identity: &str, messages: impl IntoIterator<Item = String>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .map(|message| TellRequest {
                    identity: identity.to_string(),
                    message,
                })
                .collect(),
        }
    }

    /// The single identity shared by every entry, if there is exactly one.
    pub fn sole_identity(&self) -> Option<&str> {
        let first = self.messages.first()?;
        self.messages
            .iter()
            .all(|m| m.identity == first.identity)
            .then_some(first.identity.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrateReply {
    pub identity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Greet(GreetRequest),
    Heartbeat(HeartbeatRequest),
    Tell(TellRequest),
    Narrate(NarrateRequest),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Greet(_) => "greet",
            Request::Heartbeat(_) => "heartbeat",
            Request::Tell(_) => "tell",
            Request::Narrate(_) => "narrate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Greet(GreetReply),
    Heartbeat(HeartbeatReply),
    Tell(TellReply),
    Narrate(NarrateReply),
    /// The handler refused the request.
    Rejected { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sole_identity() {
        let narrate = NarrateRequest::new("id-A", vec!["a".to_string(), "b".to_string()]);
        assert_eq!(narrate.sole_identity(), Some("id-A"));

        let mut mixed = narrate.clone();
        mixed.messages.push(TellRequest {
            identity: "id-B".into(),
            message: "c".into(),
        });
        assert_eq!(mixed.sole_identity(), None);

        assert_eq!(NarrateRequest::default().sole_identity(), None);
    }

    #[test]
    fn test_request_kind() {
        let request = Request::Heartbeat(HeartbeatRequest {
            identity: "x".into(),
        });
        assert_eq!(request.kind(), "heartbeat");
    }
}
