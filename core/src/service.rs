// Neighbors service: answers inbound protocol calls

use crate::broadcaster::ChatBroadcaster;
use crate::contacts::Registry;
use crate::discovery::{self_descriptor, DiscoveryProtocol};
use crate::protocol::{HeartbeatReply, NarrateReply, Request, Response, TellReply};
use crate::shutdown::Stopper;
use crate::transport::{RequestHandler, Transport};
use std::sync::Arc;
use tracing::{debug, error};

/// Routes greets and heartbeats to discovery and chat calls to the
/// broadcaster. Replies carry this node's own self contact.
pub struct NeighborsService<T: Transport> {
    discovery: Arc<DiscoveryProtocol<T>>,
    broadcaster: Arc<ChatBroadcaster<T>>,
    registry: Arc<dyn Registry>,
    stopper: Stopper,
}

impl<T: Transport> NeighborsService<T> {
    pub fn new(
        discovery: Arc<DiscoveryProtocol<T>>,
        broadcaster: Arc<ChatBroadcaster<T>>,
        registry: Arc<dyn Registry>,
        stopper: Stopper,
    ) -> Self {
        Self {
            discovery,
            broadcaster,
            registry,
            stopper,
        }
    }

    fn rejected(reason: &str) -> Response {
        Response::Rejected {
            reason: reason.to_string(),
        }
    }
}

impl<T: Transport> RequestHandler for NeighborsService<T> {
    fn handle(&self, request: Request) -> Response {
        debug!("Handling {}", request.kind());
        if self.stopper.stopped() {
            return Self::rejected("node is stopping");
        }
        let Some(me) = self_descriptor(self.registry.as_ref()) else {
            error!("Self contact missing, stopping");
            self.stopper.stop();
            return Self::rejected("node is stopping");
        };
        match request {
            Request::Greet(greet) => {
                if self.discovery.handle_greet(&greet) {
                    Response::Greet(me)
                } else {
                    Self::rejected("greet refused")
                }
            }
            Request::Heartbeat(heartbeat) => {
                if self.discovery.handle_heartbeat(&heartbeat.identity) {
                    Response::Heartbeat(HeartbeatReply {
                        identity: me.identity,
                    })
                } else {
                    Self::rejected("unknown identity")
                }
            }
            Request::Tell(tell) => {
                if self.broadcaster.handle_tell(&tell) {
                    Response::Tell(TellReply {
                        identity: me.identity,
                    })
                } else {
                    Self::rejected("tell refused")
                }
            }
            Request::Narrate(narrate) => {
                if self.broadcaster.handle_narrate(&narrate) {
                    Response::Narrate(NarrateReply {
                        identity: me.identity,
                    })
                } else {
                    Self::rejected("narrate refused")
                }
            }
        }
    }
}
