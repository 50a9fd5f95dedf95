//! Server network layer handling UDP communications and command dispatch

use crate::accounts::AccountStore;
use crate::connections::{ConnectionId, ConnectionTable};
use crate::engine::{EngineConfig, SessionEngine};
use crate::error::ServerError;
use crate::gateway::{ChannelGateway, OutboundMessage};
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{ClientCommand, ServerEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to the main server loop.
#[derive(Debug)]
pub enum ServerMessage {
    CommandReceived {
        command: ClientCommand,
        addr: SocketAddr,
    },
    ClientTimeout {
        conn: ConnectionId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Main server: owns the socket and the connection table, routes incoming
/// commands into the session engine, and drains the engine's outgoing event
/// queue back onto the wire.
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    accounts: Arc<AccountStore>,
    engine: Arc<SessionEngine>,
    client_timeout: Duration,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_clients: usize,
        client_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let accounts = Arc::new(AccountStore::new());
        let gateway = Arc::new(ChannelGateway::new(outbound_tx));
        let engine = SessionEngine::new(accounts.clone(), gateway, EngineConfig::default());

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new(max_clients))),
            accounts,
            engine,
            client_timeout,
            server_tx,
            server_rx,
            outbound_rx,
        })
    }

    /// Spawns the task that continuously listens for incoming datagrams.
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(command) = deserialize::<ClientCommand>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::CommandReceived { command, addr })
                            {
                                error!("Failed to send command to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize command from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the engine's outgoing event queue,
    /// resolving connection ids to addresses at send time. Events for a
    /// connection that disappeared since emission are dropped.
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let connections = Arc::clone(&self.connections);
        let mut outbound_rx =
            std::mem::replace(&mut self.outbound_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::Send { conn, event } => {
                        let addr = connections.read().await.addr_of(conn);
                        if let Some(addr) = addr {
                            if let Err(e) = Self::send_event_impl(&socket, &event, addr).await {
                                error!("Failed to send to {}: {}", conn, e);
                            }
                        }
                    }
                    OutboundMessage::Broadcast {
                        conns,
                        exclude,
                        event,
                    } => {
                        let addrs: Vec<(ConnectionId, Option<SocketAddr>)> = {
                            let table = connections.read().await;
                            conns.iter().map(|c| (*c, table.addr_of(*c))).collect()
                        };

                        for (conn, addr) in addrs {
                            if Some(conn) == exclude {
                                continue;
                            }
                            if let Some(addr) = addr {
                                if let Err(e) = Self::send_event_impl(&socket, &event, addr).await
                                {
                                    error!("Failed to send to {}: {}", conn, e);
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the task that monitors client timeouts.
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();
        let client_timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut table = connections.write().await;
                    table.check_timeouts(client_timeout)
                };

                for conn in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { conn }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_event_impl(
        socket: &UdpSocket,
        event: &ServerEvent,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = serialize(event)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    /// Direct send for pre-connection replies (login outcomes), where no
    /// connection id exists yet to route through the outgoing queue.
    async fn send_direct(&self, event: &ServerEvent, addr: SocketAddr) {
        if let Err(e) = Self::send_event_impl(&self.socket, event, addr).await {
            error!("Failed to send to {}: {}", addr, e);
        }
    }

    async fn handle_login(&self, username: String, password: String, addr: SocketAddr) {
        if username.trim().is_empty() || password.is_empty() {
            self.send_direct(&ServerEvent::LoginRejected, addr).await;
            return;
        }

        // A re-login from the same address replaces the old connection.
        let existing = self.connections.read().await.find_by_addr(addr);
        if let Some(existing) = existing {
            info!("Replacing existing connection {} from {}", existing, addr);
            self.engine.disconnect(existing).await;
            self.connections.write().await.remove(existing);
        }

        // First login registers the account; later logins must verify.
        let authenticated = if self.accounts.find(&username).await.is_some() {
            self.accounts.verify(&username, &password).await
        } else {
            self.accounts.register(&username, &password).await
        };

        if !authenticated {
            warn!("Rejected login for {} from {}", username, addr);
            self.send_direct(&ServerEvent::LoginRejected, addr).await;
            return;
        }

        let conn = self.connections.write().await.add(addr, &username);
        match conn {
            Some(conn) => {
                self.engine.bind_session(conn, &username).await;
                let rating = self.accounts.rating(&username).await;
                self.send_direct(&ServerEvent::LoggedIn { username, rating }, addr)
                    .await;
            }
            None => {
                warn!("Server full, rejecting login from {}", addr);
                self.send_direct(&ServerEvent::LoginRejected, addr).await;
            }
        }
    }

    /// Routes one decoded command into the session engine. Commands from
    /// addresses with no logged-in connection are dropped.
    async fn handle_command(&self, command: ClientCommand, addr: SocketAddr) {
        let command = match command {
            ClientCommand::Login { username, password } => {
                self.handle_login(username, password, addr).await;
                return;
            }
            other => other,
        };

        let conn = {
            let mut table = self.connections.write().await;
            table.touch_addr(addr);
            table.find_by_addr(addr)
        };
        let Some(conn) = conn else {
            warn!("Command from unknown address {}", addr);
            return;
        };

        match command {
            // Handled before connection resolution.
            ClientCommand::Login { .. } => {}
            ClientCommand::CreateRoom {
                room_id,
                difficulty,
                mode,
                round_time_secs,
                round_count,
            } => {
                self.engine
                    .create_room(conn, room_id, difficulty, mode, round_time_secs, round_count)
                    .await;
            }
            ClientCommand::JoinRoom { room_id } => {
                self.engine.join_room(conn, &room_id).await;
            }
            ClientCommand::LeaveRoom => {
                self.engine.leave_room(conn).await;
            }
            ClientCommand::Ready => {
                self.engine.ready(conn).await;
            }
            ClientCommand::CancelReady => {
                self.engine.cancel_ready(conn).await;
            }
            ClientCommand::SubmitAnswer { answer } => {
                self.engine.submit_answer(conn, &answer).await;
            }
            ClientCommand::JoinRankedQueue => {
                self.engine.join_ranked_queue(conn).await;
            }
            ClientCommand::CancelRankedQueue => {
                self.engine.cancel_ranked_queue(conn).await;
            }
            ClientCommand::CheckMatchStatus => {
                self.engine.check_match_status(conn).await;
            }
            ClientCommand::ResetRankedMatch => {
                self.engine.reset_ranked_match(conn).await;
            }
            ClientCommand::Disconnect => {
                self.engine.disconnect(conn).await;
                self.connections.write().await.remove(conn);
            }
        }
    }

    /// Main server loop coordinating all operations.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            match message {
                ServerMessage::CommandReceived { command, addr } => {
                    self.handle_command(command, addr).await;
                }
                ServerMessage::ClientTimeout { conn } => {
                    info!("{} timed out", conn);
                    self.engine.disconnect(conn).await;
                }
                ServerMessage::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
