//! Server network layer handling UDP communications and request dispatch

use crate::submission::{ClientInfo, Rejection, SubmissionPipeline, SubmitRequest};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the dispatch loop to the network sender task
#[derive(Debug)]
pub enum ReplyMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating the socket, the pipeline and the sweep task
pub struct Server {
    socket: Arc<UdpSocket>,
    pipeline: Arc<SubmissionPipeline>,
    sweep_interval: Duration,
    sweep_handle: Option<JoinHandle<()>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    reply_tx: mpsc::UnboundedSender<ReplyMessage>,
    reply_rx: Option<mpsc::UnboundedReceiver<ReplyMessage>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        pipeline: SubmissionPipeline,
        sweep_interval: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            pipeline: Arc::new(pipeline),
            sweep_interval,
            sweep_handle: None,
            server_tx,
            server_rx,
            reply_tx,
            reply_rx: Some(reply_rx),
        })
    }

    /// Address the socket actually bound to (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for requesting shutdown from outside the loop.
    pub fn control_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns the task that continuously listens for incoming datagrams
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
                                error!("Failed to send packet to main loop: {}", e);
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

    /// Spawns the task that writes queued responses to the socket
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut reply_rx = match self.reply_rx.take() {
            Some(rx) => rx,
            None => return,
        };

        tokio::spawn(async move {
            while let Some(ReplyMessage::SendPacket { packet, addr }) = reply_rx.recv().await {
                match serialize(&packet) {
                    Ok(data) => {
                        if let Err(e) = socket.send_to(&data, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    Err(e) => error!("Failed to serialize response: {}", e),
                }
            }
        });
    }

    /// Spawns the periodic cleanup sweep for expired tokens and stale
    /// rate-limit windows. The handle is kept so shutdown can cancel it.
    fn spawn_sweeper(&mut self) {
        let pipeline = Arc::clone(&self.pipeline);
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.sweep_handle = Some(tokio::spawn(async move {
            // First tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                pipeline.sweep().await;
            }
        }));
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.reply_tx.send(ReplyMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Maps one request packet onto the pipeline and queues the response
    async fn handle_packet(&self, packet: Packet, addr: SocketAddr) {
        let response = match packet {
            Packet::StartSession => {
                let issued = self.pipeline.start_session();
                Packet::SessionStarted {
                    game_token: issued.token,
                    server_timestamp: issued.server_timestamp,
                    session_id: issued.session_id,
                }
            }

            Packet::SubmitScore {
                name,
                phone,
                reaction_time_ms,
                car_number,
                game_token,
            } => {
                let request = SubmitRequest {
                    name,
                    phone,
                    reaction_time_ms,
                    car_number,
                    game_token,
                };
                match self
                    .pipeline
                    .submit(request, ClientInfo::from_peer(addr))
                    .await
                {
                    Ok(outcome) => Packet::ScoreAccepted {
                        leaderboard: outcome.leaderboard,
                        position: outcome.position,
                        is_current_time: outcome.is_current_time,
                    },
                    Err(rejection) => rejection_packet(rejection),
                }
            }

            Packet::GetLeaderboard => match self.pipeline.leaderboard().await {
                Ok(leaderboard) => Packet::LeaderboardState { leaderboard },
                Err(rejection) => rejection_packet(rejection),
            },

            Packet::Register {
                name,
                phone,
                car_number,
            } => match self.pipeline.register(&name, &phone, car_number).await {
                Ok(()) => Packet::Registered,
                Err(rejection) => rejection_packet(rejection),
            },

            Packet::AdminInspect { admin_key } => {
                match self.pipeline.admin_inspect(admin_key.as_deref()).await {
                    Ok(entries) => Packet::AdminReport {
                        count: entries.len() as u32,
                        entries,
                    },
                    Err(rejection) => rejection_packet(rejection),
                }
            }

            Packet::AdminRemove {
                admin_key,
                name,
                phone,
            } => {
                match self
                    .pipeline
                    .admin_remove(admin_key.as_deref(), &name, phone.as_deref())
                    .await
                {
                    Ok((removed, leaderboard)) => Packet::Removed {
                        removed,
                        leaderboard,
                    },
                    Err(rejection) => rejection_packet(rejection),
                }
            }

            Packet::AdminClear { admin_key } => {
                match self.pipeline.admin_clear(admin_key.as_deref()).await {
                    Ok(()) => Packet::Cleared,
                    Err(rejection) => rejection_packet(rejection),
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
                return;
            }
        };

        self.send_packet(response, addr);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_sweeper();

        info!("Server started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    debug!("request from {}", addr);
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        // The sweep task belongs to this server's lifecycle; stop it with us.
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
        }

        Ok(())
    }
}

fn rejection_packet(rejection: Rejection) -> Packet {
    Packet::Rejected {
        category: rejection.category,
        message: rejection.message,
        retry_after_ms: rejection.retry_after_ms,
    }
}
