//! Server network layer handling UDP communications and command dispatch

use crate::connections::{ConnectionTable, CONNECTION_TIMEOUT};
use crate::registry::SessionRegistry;
use crate::session::SessionCommand;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ErrorKind, Packet, Question};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks and session tasks to the dispatch loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ClientTimeout {
        addr: SocketAddr,
        game_code: String,
    },
    /// A session accepted a join; the connection now belongs to that game.
    PlayerRegistered {
        addr: SocketAddr,
        game_code: String,
    },
    /// A session dropped a player (leave, timeout or disconnect).
    PlayerUnregistered {
        addr: SocketAddr,
    },
    /// A finished session reached the end of its retention window.
    SessionExpired {
        game_code: String,
        members: Vec<SocketAddr>,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from session tasks to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        addrs: Vec<SocketAddr>,
    },
}

/// Main server coordinating networking, the session registry and the
/// connection table. Sessions themselves run as independent tasks; the
/// dispatch loop only routes commands to them and maintains the two maps.
pub struct Server {
    socket: Arc<UdpSocket>,
    connections: Arc<RwLock<ConnectionTable>>,
    registry: SessionRegistry,
    question_bank: Arc<Vec<Question>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        question_bank: Vec<Question>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            connections: Arc::new(RwLock::new(ConnectionTable::new(CONNECTION_TIMEOUT))),
            registry: SessionRegistry::new(),
            question_bank: Arc::new(question_bank),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// Address the server socket is bound to (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to dispatch loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet, addrs } => {
                        for addr in addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to member {}: {}", addr, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that sweeps silent connections
    fn spawn_timeout_checker(&self) {
        let connections = Arc::clone(&self.connections);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut connections_guard = connections.write().await;
                    connections_guard.check_timeouts()
                };

                for (addr, game_code) in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { addr, game_code })
                    {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_error(&self, addr: SocketAddr, kind: ErrorKind, message: &str) {
        self.send(
            Packet::Error {
                kind,
                message: message.to_string(),
            },
            addr,
        );
    }

    /// Routes a command to the session identified by `game_code`, reporting
    /// NotFound to the sender when the code is unknown or the session has
    /// already been torn down.
    fn forward(&self, game_code: &str, command: SessionCommand, addr: SocketAddr) {
        let delivered = self
            .registry
            .lookup(game_code)
            .map(|handle| handle.send(command).is_ok())
            .unwrap_or(false);

        if !delivered {
            self.send_error(addr, ErrorKind::NotFound, "Game not found");
        }
    }

    /// Processes an inbound packet from a client connection
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        // Any packet from a joined connection counts as liveness.
        self.connections.write().await.touch(addr);

        match packet {
            Packet::CreateGame => {
                let game_code = self.registry.create_session(
                    self.question_bank.as_ref().clone(),
                    self.game_tx.clone(),
                    self.server_tx.clone(),
                );
                self.send(Packet::GameCreated { game_code }, addr);
            }

            Packet::GameStatus { game_code } => {
                self.forward(&game_code, SessionCommand::Status { addr }, addr);
            }

            Packet::JoinGame {
                game_code,
                nickname,
            } => {
                self.forward(&game_code, SessionCommand::Join { addr, nickname }, addr);
            }

            Packet::StartGame { game_code } => {
                self.forward(&game_code, SessionCommand::Start { addr }, addr);
            }

            Packet::SubmitAnswer {
                game_code,
                question_id,
                answer_index,
                elapsed_seconds,
            } => {
                self.forward(
                    &game_code,
                    SessionCommand::SubmitAnswer {
                        addr,
                        question_id,
                        answer_index,
                        elapsed_seconds,
                    },
                    addr,
                );
            }

            Packet::GetLeaderboard { game_code } => {
                self.forward(&game_code, SessionCommand::Leaderboard { addr }, addr);
            }

            Packet::Heartbeat => {
                // Liveness was refreshed above; nothing else to do.
                debug!("Heartbeat from {}", addr);
            }

            Packet::Leave => {
                let game_code = self.connections.read().await.game_code_of(addr);
                if let Some(game_code) = game_code {
                    self.forward(&game_code, SessionCommand::Disconnect { addr }, addr);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::PacketReceived { packet, addr } => {
                self.handle_packet(packet, addr).await;
            }
            ServerMessage::ClientTimeout { addr, game_code } => {
                info!("Connection {} timed out in game {}", addr, game_code);
                if let Some(handle) = self.registry.lookup(&game_code) {
                    let _ = handle.send(SessionCommand::Disconnect { addr });
                }
            }
            ServerMessage::PlayerRegistered { addr, game_code } => {
                self.connections.write().await.register(addr, game_code);
            }
            ServerMessage::PlayerUnregistered { addr } => {
                self.connections.write().await.unregister(addr);
            }
            ServerMessage::SessionExpired { game_code, members } => {
                self.registry.remove(&game_code);
                let mut connections = self.connections.write().await;
                for member in members {
                    connections.unregister(member);
                }
            }
            ServerMessage::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    /// Main dispatch loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            if !self.handle_message(message).await {
                break;
            }
        }

        Ok(())
    }
}
