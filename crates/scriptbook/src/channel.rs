//! Per-kernel push channel.
//!
//! A [`KernelChannel`] is a handle over two in-process queues: events the
//! client sends and events the server pushes. [`WsConnector`] backs those
//! queues with a WebSocket at `{channel_url}/ws/{kernel_id}`, pumping JSON
//! text frames in a background task. Dropped connections are not retried.
//! Closing gives the pump [`CLOSE_GRACE`] to send its close frame before it
//! is aborted.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::ChannelError;
use crate::protocol::{ClientEvent, KernelId, ServerEvent};
use crate::settings::Settings;

const CHANNEL_BUFFER: usize = 32;

/// How long a closed channel's pump may keep running to flush the close
/// frame.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Opens channels for kernels.
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    async fn connect(&self, kernel_id: &KernelId) -> Result<KernelChannel, ChannelError>;
}

/// Client end of a kernel channel.
#[derive(Debug)]
pub struct KernelChannel {
    kernel_id: KernelId,
    outgoing: Option<mpsc::Sender<ClientEvent>>,
    incoming: mpsc::Receiver<ServerEvent>,
    pump: Option<JoinHandle<()>>,
}

impl KernelChannel {
    pub fn new(
        kernel_id: KernelId,
        outgoing: mpsc::Sender<ClientEvent>,
        incoming: mpsc::Receiver<ServerEvent>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            kernel_id,
            outgoing: Some(outgoing),
            incoming,
            pump,
        }
    }

    /// An in-memory channel and the server end that talks to it.
    pub fn loopback(kernel_id: KernelId) -> (Self, ChannelPeer) {
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_BUFFER);
        let channel = Self::new(kernel_id, out_tx, in_rx, None);
        let peer = ChannelPeer {
            incoming: out_rx,
            outgoing: in_tx,
        };
        (channel, peer)
    }

    pub fn kernel_id(&self) -> &KernelId {
        &self.kernel_id
    }

    pub async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        let sender = self.outgoing.as_ref().ok_or(ChannelError::Closed)?;
        sender.send(event).await.map_err(|_| ChannelError::Closed)
    }

    /// Next pushed event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.incoming.recv().await
    }

    /// Close the channel and stop the pump.
    ///
    /// The pump sends a close frame once the sender is gone; if it is still
    /// running after [`CLOSE_GRACE`] (a peer that stopped reading, say) it
    /// is aborted.
    pub fn close(&mut self) {
        if self.outgoing.take().is_some() {
            debug!("[channel] Closing channel for kernel {}", self.kernel_id);
        }
        self.incoming.close();
        let Some(pump) = self.pump.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(CLOSE_GRACE).await;
                    pump.abort();
                });
            }
            Err(_) => pump.abort(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outgoing.is_none()
    }
}

impl Drop for KernelChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Server end of a [`KernelChannel::loopback`] pair.
#[derive(Debug)]
pub struct ChannelPeer {
    incoming: mpsc::Receiver<ClientEvent>,
    outgoing: mpsc::Sender<ServerEvent>,
}

impl ChannelPeer {
    /// Next event sent by the client, or `None` once it closed the channel.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.incoming.recv().await
    }

    /// A second handle for pushing events, usable after the peer moves.
    pub fn server_sender(&self) -> mpsc::Sender<ServerEvent> {
        self.outgoing.clone()
    }

    pub async fn send(&self, event: ServerEvent) -> Result<(), ChannelError> {
        self.outgoing
            .send(event)
            .await
            .map_err(|_| ChannelError::Closed)
    }
}

/// Connects kernel channels over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    base: Url,
}

impl WsConnector {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Ok(Self::new(settings.channel_url()?))
    }

    /// `{base}/ws/{kernel_id}`, keeping any path prefix on the base.
    pub fn channel_url(&self, kernel_id: &KernelId) -> Result<Url, ChannelError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Connect {
                kernel_id: kernel_id.clone(),
                message: format!("{} cannot be a base URL", self.base),
            })?
            .pop_if_empty()
            .push("ws")
            .push(kernel_id.as_str());
        Ok(url)
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, kernel_id: &KernelId) -> Result<KernelChannel, ChannelError> {
        let url = self.channel_url(kernel_id)?;
        debug!("[channel] Connecting to {}", url);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect {
                kernel_id: kernel_id.clone(),
                message: e.to_string(),
            })?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(CHANNEL_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(CHANNEL_BUFFER);
        let pump_kernel = kernel_id.clone();

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => {
                        let Some(event) = outgoing else {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        };
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("[channel] Failed to encode {:?}: {}", event, e);
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!("[channel] Send failed for kernel {}: {}", pump_kernel, e);
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if in_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => warn!("[channel] Ignoring malformed event: {}", e),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("[channel] Read failed for kernel {}: {}", pump_kernel, e);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("[channel] Pump for kernel {} stopped", pump_kernel);
        });

        Ok(KernelChannel::new(kernel_id.clone(), out_tx, in_rx, Some(pump)))
    }
}
