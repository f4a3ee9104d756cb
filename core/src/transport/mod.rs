//! Transport layer
//!
//! Node-to-node RPC behind a small capability trait. Discovery and the
//! broadcaster only see [`Transport`]; inbound calls arrive through a
//! [`RequestHandler`]. Two implementations are provided: TCP for real
//! nodes and an in-process hub for tests and demos.

pub mod local;
pub mod tcp;

pub use local::LocalTransport;
pub use tcp::{TcpServer, TcpStub, TcpTransport};

use crate::protocol::{
    GreetReply, GreetRequest, HeartbeatReply, HeartbeatRequest, NarrateReply, NarrateRequest,
    Request, Response, TellReply, TellRequest,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Rejected by peer: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Transport error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Server side of the protocol: turns one request into one response.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Request) -> Response;
}

/// Client side of the protocol.
///
/// A stub is a cheap handle to one peer address. Creating it may or may not
/// touch the network; callers drop it after any failure and create a new one
/// on the next attempt.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Stub: Clone + Send + Sync + 'static;

    async fn create_stub(&self, address: &str) -> Result<Self::Stub, TransportError>;

    /// One request/response exchange, bounded by the transport timeout.
    async fn call(&self, stub: &Self::Stub, request: Request) -> Result<Response, TransportError>;

    async fn send_greet(
        &self,
        stub: &Self::Stub,
        request: GreetRequest,
    ) -> Result<GreetReply, TransportError> {
        match self.call(stub, Request::Greet(request)).await? {
            Response::Greet(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    async fn send_heartbeat(
        &self,
        stub: &Self::Stub,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatReply, TransportError> {
        match self.call(stub, Request::Heartbeat(request)).await? {
            Response::Heartbeat(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    async fn send_tell(
        &self,
        stub: &Self::Stub,
        request: TellRequest,
    ) -> Result<TellReply, TransportError> {
        match self.call(stub, Request::Tell(request)).await? {
            Response::Tell(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }

    async fn send_narrate(
        &self,
        stub: &Self::Stub,
        request: NarrateRequest,
    ) -> Result<NarrateReply, TransportError> {
        match self.call(stub, Request::Narrate(request)).await? {
            Response::Narrate(reply) => Ok(reply),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> TransportError {
    match response {
        Response::Rejected { reason } => TransportError::Rejected(reason),
        Response::Greet(_) => TransportError::UnexpectedResponse("greet".into()),
        Response::Heartbeat(_) => TransportError::UnexpectedResponse("heartbeat".into()),
        Response::Tell(_) => TransportError::UnexpectedResponse("tell".into()),
        Response::Narrate(_) => TransportError::UnexpectedResponse("narrate".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: refused");
        let err = TransportError::Rejected("unknown identity".to_string());
        assert_eq!(err.to_string(), "Rejected by peer: unknown identity");
    }

    #[test]
    fn test_transport_error_serialization() {
        let err = TransportError::Timeout("2000ms".to_string());
        let json = serde_json::to_string(&err).unwrap();
        let back: TransportError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_unexpected_maps_rejection() {
        let err = unexpected(Response::Rejected {
            reason: "nope".into(),
        });
        assert_eq!(err, TransportError::Rejected("nope".into()));
        let err = unexpected(Response::Tell(TellReply {
            identity: "x".into(),
        }));
        assert_eq!(err, TransportError::UnexpectedResponse("tell".into()));
    }
}
