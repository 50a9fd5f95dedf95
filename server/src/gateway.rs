//! Realtime gateway abstraction
//!
//! The session engine never talks to sockets. It sees two capabilities:
//! send an event to one connection, or broadcast one to a room's members
//! (optionally excluding the sender). The production implementation queues
//! events into the network layer's outgoing channel, which preserves
//! per-room ordering; tests substitute a recording implementation.

use crate::connections::ConnectionId;
use shared::ServerEvent;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub trait Gateway: Send + Sync + 'static {
    fn unicast(&self, conn: ConnectionId, event: ServerEvent);
    fn broadcast(&self, conns: &[ConnectionId], exclude: Option<ConnectionId>, event: ServerEvent);
}

/// Messages queued for the network sender task.
#[derive(Debug)]
pub enum OutboundMessage {
    Send {
        conn: ConnectionId,
        event: ServerEvent,
    },
    Broadcast {
        conns: Vec<ConnectionId>,
        exclude: Option<ConnectionId>,
        event: ServerEvent,
    },
}

/// Gateway backed by the unbounded outgoing channel drained by the UDP
/// sender task. Send failures mean the server is shutting down; events are
/// dropped silently at that point.
pub struct ChannelGateway {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelGateway {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }
}

impl Gateway for ChannelGateway {
    fn unicast(&self, conn: ConnectionId, event: ServerEvent) {
        let _ = self.tx.send(OutboundMessage::Send { conn, event });
    }

    fn broadcast(&self, conns: &[ConnectionId], exclude: Option<ConnectionId>, event: ServerEvent) {
        let _ = self.tx.send(OutboundMessage::Broadcast {
            conns: conns.to_vec(),
            exclude,
            event,
        });
    }
}

/// Who a recorded event was addressed to.
#[derive(Debug, Clone)]
pub enum Audience {
    One(ConnectionId),
    Room(Vec<ConnectionId>, Option<ConnectionId>),
}

/// In-memory gateway used by the test suites: records every delivery in
/// emission order instead of hitting the network.
#[derive(Default)]
pub struct RecordingGateway {
    log: Mutex<Vec<(Audience, ServerEvent)>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in order, regardless of audience.
    pub fn events(&self) -> Vec<ServerEvent> {
        self.log
            .lock()
            .expect("gateway log poisoned")
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Events a particular connection would have received.
    pub fn events_for(&self, conn: ConnectionId) -> Vec<ServerEvent> {
        self.log
            .lock()
            .expect("gateway log poisoned")
            .iter()
            .filter(|(audience, _)| match audience {
                Audience::One(c) => *c == conn,
                Audience::Room(conns, exclude) => {
                    conns.contains(&conn) && *exclude != Some(conn)
                }
            })
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().expect("gateway log poisoned").clear();
    }
}

impl Gateway for RecordingGateway {
    fn unicast(&self, conn: ConnectionId, event: ServerEvent) {
        self.log
            .lock()
            .expect("gateway log poisoned")
            .push((Audience::One(conn), event));
    }

    fn broadcast(&self, conns: &[ConnectionId], exclude: Option<ConnectionId>, event: ServerEvent) {
        self.log
            .lock()
            .expect("gateway log poisoned")
            .push((Audience::Room(conns.to_vec(), exclude), event));
    }
}
