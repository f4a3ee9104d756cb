// TCP transport
//
// One request per connection: connect, write a frame, read a frame, close.
// Every step of a call shares one deadline taken from the transport timeout.

use super::{RequestHandler, Transport, TransportError};
use crate::config::TransportConfig;
use crate::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_frame, write_frame,
    Request, Response,
};
use crate::shutdown::Stopper;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Resolved peer address. Connections are opened per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpStub {
    pub address: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
    max_frame_size: usize,
}

impl TcpTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            timeout: config.rpc_timeout(),
            max_frame_size: config.max_frame_size,
        }
    }

    async fn exchange(&self, address: SocketAddr, request: &Request) -> Result<Response, TransportError> {
        let payload = encode_request(request).map_err(|e| TransportError::Codec(e.to_string()))?;
        let mut stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
        write_frame(&mut stream, &payload, self.max_frame_size)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let reply = read_frame(&mut stream, self.max_frame_size)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        decode_response(&reply).map_err(|e| TransportError::Codec(e.to_string()))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stub = TcpStub;

    async fn create_stub(&self, address: &str) -> Result<Self::Stub, TransportError> {
        let address = address
            .parse::<SocketAddr>()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?;
        Ok(TcpStub { address })
    }

    async fn call(&self, stub: &Self::Stub, request: Request) -> Result<Response, TransportError> {
        debug!("Sending {} to {}", request.kind(), stub.address);
        match tokio::time::timeout(self.timeout, self.exchange(stub.address, &request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "{} to {} after {}ms",
                request.kind(),
                stub.address,
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Accepts neighbor connections and answers them through a [`RequestHandler`].
pub struct TcpServer {
    listener: TcpListener,
    timeout: Duration,
    max_frame_size: usize,
}

impl TcpServer {
    pub async fn bind(address: &str, config: &TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", address, e)))?;
        Ok(Self {
            listener,
            timeout: config.rpc_timeout(),
            max_frame_size: config.max_frame_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `stopper` fires.
    pub async fn serve(self, handler: Arc<dyn RequestHandler>, stopper: Stopper) {
        if let Ok(address) = self.listener.local_addr() {
            info!("Listening for neighbors on {}", address);
        }
        loop {
            tokio::select! {
                _ = stopper.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = handler.clone();
                        let timeout = self.timeout;
                        let max_frame_size = self.max_frame_size;
                        tokio::spawn(async move {
                            let served = tokio::time::timeout(
                                timeout,
                                serve_connection(stream, handler, max_frame_size),
                            )
                            .await;
                            match served {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => debug!("Connection from {} failed: {}", peer, e),
                                Err(_) => debug!("Connection from {} timed out", peer),
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                }
            }
        }
        info!("Neighbor server stopped");
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn RequestHandler>,
    max_frame_size: usize,
) -> anyhow::Result<()> {
    let bytes = read_frame(&mut stream, max_frame_size).await?;
    let request = decode_request(&bytes)?;
    let response = handler.handle(request);
    let bytes = encode_response(&response)?;
    write_frame(&mut stream, &bytes, max_frame_size).await
}
