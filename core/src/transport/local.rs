// In-process transport
//
// A shared hub of request handlers keyed by address. Calls are encoded and
// decoded like on the wire so both sides only ever see owned copies.
// Unregistering an address makes it look like an unreachable peer.

use super::{RequestHandler, Transport, TransportError};
use crate::protocol::{decode_request, decode_response, encode_request, encode_response, Request, Response};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Default)]
pub struct LocalTransport {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn RequestHandler>>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handler` reachable at `address`, replacing any previous one.
    pub fn register(&self, address: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        let address = address.into();
        debug!("Registered local handler at {}", address);
        self.handlers.write().insert(address, handler);
    }

    pub fn unregister(&self, address: &str) -> bool {
        debug!("Unregistered local handler at {}", address);
        self.handlers.write().remove(address).is_some()
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.handlers.read().contains_key(address)
    }

    fn handler(&self, address: &str) -> Result<Arc<dyn RequestHandler>, TransportError> {
        self.handlers
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionFailed(format!("nothing listening at {}", address)))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    type Stub = String;

    async fn create_stub(&self, address: &str) -> Result<Self::Stub, TransportError> {
        self.handler(address)?;
        Ok(address.to_string())
    }

    async fn call(&self, stub: &Self::Stub, request: Request) -> Result<Response, TransportError> {
        let handler = self.handler(stub)?;
        let bytes = encode_request(&request).map_err(|e| TransportError::Codec(e.to_string()))?;
        let request = decode_request(&bytes).map_err(|e| TransportError::Codec(e.to_string()))?;
        let response = handler.handle(request);
        let bytes = encode_response(&response).map_err(|e| TransportError::Codec(e.to_string()))?;
        decode_response(&bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }
}
