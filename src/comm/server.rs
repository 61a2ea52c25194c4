use crate::comm::config::CommConfig;
use crate::comm::error::{CommError, CommInitError, Result};
use crate::comm::protocol::{
    HEADER_LEN, decode_header, decode_request_payload, encode_request_ack, encode_response,
    encode_update,
};
use crate::comm::types::{MsgType, RequestPayload, ResponsePayload, UserRequest, UserResponse};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sequence deduplication entry
#[derive(Debug)]
struct DedupEntry {
    /// When this entry was created
    instant: Instant,
    /// Cached response to resend if duplicate
    cached_response: Option<Vec<u8>>,
}

type RequestKey = (SocketAddr, u32);

/// State shared by the receive loop and the per-request tasks
struct Shared {
    socket: UdpSocket,
    config: CommConfig,
    /// Channel sender to forward UserRequests to main loop
    loop_sender: mpsc::Sender<UserRequest>,
    /// Sequence deduplication table per client
    dedup: Mutex<HashMap<SocketAddr, HashMap<u32, DedupEntry>>>,
    /// Cancellation handles of requests still being served
    inflight: Mutex<HashMap<RequestKey, CancellationToken>>,
}

/// Comm server - handles UDP communication with clients
pub struct Comm {
    shared: Arc<Shared>,
}

impl Comm {
    /// Create a new Comm instance and bind UDP socket
    /// Returns the comm instance and receiver for communication with main loop
    pub async fn new(
        config: CommConfig,
    ) -> std::result::Result<(Comm, mpsc::Receiver<UserRequest>), CommInitError> {
        let socket = UdpSocket::bind(config.bind_addr()?)
            .await
            .map_err(|e| CommInitError::BindFailed(e.to_string()))?;

        if let Ok(addr) = socket.local_addr() {
            info!(%addr, "Comm listening");
        }

        let (tx, rx) = mpsc::channel(1024);

        Ok((
            Self {
                shared: Arc::new(Shared {
                    socket,
                    config,
                    loop_sender: tx,
                    dedup: Mutex::new(HashMap::new()),
                    inflight: Mutex::new(HashMap::new()),
                }),
            },
            rx,
        ))
    }

    /// Get local socket address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    /// Run the Comm server
    pub async fn run(self) -> Result<()> {
        let mut buf = vec![0u8; self.shared.config.max_payload_bytes + 1024];
        let mut cleanup_interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                result = self.shared.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            if let Err(e) = self.shared.handle_packet(&buf[..len], addr).await {
                                warn!(%addr, error = %e, "Failed to handle packet");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Recv error");
                            return Err(CommError::RecvError(e.to_string()));
                        }
                    }
                }
                _ = cleanup_interval.tick() => {
                    self.shared.cleanup_dedup().await;
                }
            }
        }
    }
}

impl Shared {
    async fn send(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(bytes, addr)
            .await
            .map_err(|e| CommError::SendError(e.to_string()))?;
        Ok(())
    }

    /// Handle incoming packet
    async fn handle_packet(self: &Arc<Self>, packet: &[u8], client_addr: SocketAddr) -> Result<()> {
        if packet.len() < HEADER_LEN {
            warn!(%client_addr, len = packet.len(), "Truncated packet");
            return Err(CommError::DecodeError("Packet too short".to_string()));
        }

        let payload_len = packet.len() - HEADER_LEN;
        if payload_len > self.config.max_payload_bytes {
            warn!(%client_addr, payload_len, "Payload too large");
            return Err(CommError::PayloadTooLarge(payload_len));
        }

        let (msg_type, seq) = decode_header(packet)?;
        let payload = &packet[HEADER_LEN..];

        debug!(msg_type = msg_type as u8, %client_addr, seq, "Received packet");

        match msg_type {
            MsgType::Request => self.handle_request(payload, seq, client_addr).await,
            MsgType::Cancel => {
                self.handle_cancel(seq, client_addr).await;
                Ok(())
            }
            _ => {
                warn!(msg_type = msg_type as u8, %client_addr, "Unexpected message type");
                Ok(())
            }
        }
    }

    /// Trip the token of an in-flight request
    async fn handle_cancel(&self, seq: u32, client_addr: SocketAddr) {
        let inflight = self.inflight.lock().await;
        match inflight.get(&(client_addr, seq)) {
            Some(token) => {
                info!(%client_addr, seq, "Cancelling request");
                token.cancel();
            }
            None => debug!(%client_addr, seq, "Cancel for unknown or finished request"),
        }
    }

    /// Handle incoming REQUEST: dedup, ACK, then serve on its own task
    async fn handle_request(
        self: &Arc<Self>,
        payload_bytes: &[u8],
        seq: u32,
        client_addr: SocketAddr,
    ) -> Result<()> {
        let mut dedup = self.dedup.lock().await;
        let client_entries = dedup.entry(client_addr).or_default();

        if client_entries.len() >= self.config.dedup_capacity {
            let oldest_seq = client_entries
                .iter()
                .min_by_key(|(_, e)| e.instant)
                .map(|(seq, _)| *seq);
            if let Some(seq_to_remove) = oldest_seq {
                client_entries.remove(&seq_to_remove);
                debug!(seq = seq_to_remove, "Dedup table at capacity, removed oldest entry");
            }
        }

        match client_entries.entry(seq) {
            Entry::Occupied(entry) => {
                // Duplicate: resend the cached response, or ACK while still working
                let reply = match &entry.get().cached_response {
                    Some(cached) => {
                        info!(seq, %client_addr, "Duplicate request, resending cached response");
                        cached.clone()
                    }
                    None => {
                        debug!(seq, %client_addr, "Duplicate request still in progress, sending ACK");
                        encode_request_ack(seq)?
                    }
                };
                drop(dedup);
                self.send(&reply, client_addr).await
            }
            Entry::Vacant(entry) => {
                // Registered before processing so retries during processing are recognized
                entry.insert(DedupEntry {
                    instant: Instant::now(),
                    cached_response: None,
                });
                drop(dedup);

                let request = decode_request_payload(payload_bytes)?;
                info!(
                    seq,
                    %client_addr,
                    agent = %request.agent,
                    stream = request.stream,
                    content_len = request.content.len(),
                    "New request"
                );

                self.send(&encode_request_ack(seq)?, client_addr).await?;

                let token = CancellationToken::new();
                self.inflight
                    .lock()
                    .await
                    .insert((client_addr, seq), token.clone());

                let shared = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = shared.serve(request, seq, client_addr, token).await {
                        warn!(seq, %client_addr, error = %e, "Request failed");
                    }
                    shared.inflight.lock().await.remove(&(client_addr, seq));
                });
                Ok(())
            }
        }
    }

    /// Forward one request to the main loop, relay its updates, send the response
    async fn serve(
        &self,
        request: RequestPayload,
        seq: u32,
        client_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (reply_tx, mut reply_rx) = oneshot::channel::<UserResponse>();
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();

        let user_request = UserRequest {
            agent: request.agent,
            content: request.content,
            headers: request.headers,
            stream: request.stream,
            cancel: cancel.clone(),
            updates: updates_tx,
            reply: reply_tx,
            source_addr: client_addr,
        };

        if let Err(e) = self.loop_sender.send(user_request).await {
            error!(error = %e, "Failed to send request to main loop");
            let bytes = encode_response(
                seq,
                &ResponsePayload {
                    content: "Internal server error".to_string(),
                    is_error: true,
                },
            )?;
            self.send(&bytes, client_addr).await?;
            return Err(CommError::ChannelClosed);
        }

        let deadline = tokio::time::sleep(Duration::from_secs(self.config.response_timeout_secs));
        tokio::pin!(deadline);

        let response = loop {
            tokio::select! {
                Some(update) = updates_rx.recv() => {
                    self.send(&encode_update(seq, &update)?, client_addr).await?;
                }
                reply = &mut reply_rx => {
                    break reply.unwrap_or_else(|_| {
                        warn!(seq, "Channel closed without response");
                        UserResponse::error("No response from handler".to_string())
                    });
                }
                _ = &mut deadline => {
                    warn!(seq, "Timeout waiting for response");
                    cancel.cancel();
                    break UserResponse::error("Response timeout".to_string());
                }
            }
        };

        // Updates queued before the reply still go out first
        while let Ok(update) = updates_rx.try_recv() {
            self.send(&encode_update(seq, &update)?, client_addr).await?;
        }

        let response_bytes = encode_response(
            seq,
            &ResponsePayload {
                content: response.content,
                is_error: response.is_error,
            },
        )?;
        self.send(&response_bytes, client_addr).await?;
        debug!(seq, %client_addr, "Sent RESPONSE");

        let mut dedup = self.dedup.lock().await;
        if let Some(client_entries) = dedup.get_mut(&client_addr) {
            client_entries.insert(
                seq,
                DedupEntry {
                    instant: Instant::now(),
                    cached_response: Some(response_bytes),
                },
            );
        }
        Ok(())
    }

    /// Cleanup expired entries from deduplication table
    async fn cleanup_dedup(&self) {
        let mut dedup = self.dedup.lock().await;
        let ttl = Duration::from_secs(self.config.dedup_ttl_secs);
        let now = Instant::now();

        for entries in dedup.values_mut() {
            entries.retain(|_seq, entry| now.duration_since(entry.instant) < ttl);
        }
        dedup.retain(|_addr, entries| !entries.is_empty());

        debug!(clients = dedup.len(), "Dedup table cleaned");
    }
}
