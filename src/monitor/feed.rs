//! Event feed subscription
//!
//! The scheduler publishes job status changes on a ZeroMQ PUB socket. A
//! [`ZmqFeed`] subscribes to every topic and hands received messages to the
//! monitor through a channel, so the monitor can block on a receive with a
//! deadline while the socket is serviced on its own thread.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lava_protocol::FeedMessage;
use thiserror::Error;
use tokio::sync::oneshot;
use zeromq::{Socket, SocketRecv, SubSocket};

/// Feed errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("cannot subscribe to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("event feed closed")]
    Closed,
}

impl FeedError {
    fn connect(endpoint: &str, message: impl Into<String>) -> Self {
        FeedError::Connect {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

/// An open subscription
pub trait EventFeed: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived in time. A zero timeout only returns
    /// what is already buffered.
    fn next_message(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError>;
}

/// Opens subscriptions to a feed endpoint
pub trait FeedConnector: Send + Sync {
    fn subscribe(&self, endpoint: &str) -> Result<Box<dyn EventFeed>, FeedError>;
}

/// Connector for the scheduler's ZeroMQ publisher
#[derive(Debug, Clone)]
pub struct ZmqConnector {
    connect_timeout: Duration,
}

impl ZmqConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl FeedConnector for ZmqConnector {
    fn subscribe(&self, endpoint: &str) -> Result<Box<dyn EventFeed>, FeedError> {
        let feed = ZmqFeed::connect(endpoint, self.connect_timeout)?;
        Ok(Box::new(feed))
    }
}

/// ZeroMQ SUB socket serviced on a dedicated thread
pub struct ZmqFeed {
    endpoint: String,
    messages: Receiver<FeedMessage>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ZmqFeed {
    /// Connect and subscribe to all topics.
    ///
    /// Returns once the subscription is in place, so events published after
    /// this call are delivered.
    pub fn connect(endpoint: &str, connect_timeout: Duration) -> Result<Self, FeedError> {
        let (message_tx, messages) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let target = endpoint.to_string();

        let worker = thread::Builder::new()
            .name("lava-event-feed".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut socket = SubSocket::new();
                    match tokio::time::timeout(connect_timeout, socket.connect(&target)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                        Err(_) => {
                            let _ = ready_tx.send(Err("connection timed out".to_string()));
                            return;
                        }
                    }
                    if let Err(e) = socket.subscribe("").await {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    loop {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            received = socket.recv() => match received {
                                Ok(message) => {
                                    let frames = message
                                        .into_vec()
                                        .into_iter()
                                        .map(|frame| frame.to_vec())
                                        .collect();
                                    if message_tx.send(FeedMessage::new(frames)).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "event feed receive failed");
                                    break;
                                }
                            }
                        }
                    }
                    let _ = socket.close().await;
                });
            })
            .map_err(|e| FeedError::connect(endpoint, e.to_string()))?;

        let mut feed = Self {
            endpoint: endpoint.to_string(),
            messages,
            shutdown: Some(shutdown),
            worker: Some(worker),
        };

        // Allow for runtime start-up on top of the connect budget
        match ready_rx.recv_timeout(connect_timeout + Duration::from_secs(1)) {
            Ok(Ok(())) => {
                tracing::debug!(endpoint = %endpoint, "subscribed to event feed");
                Ok(feed)
            }
            Ok(Err(message)) => {
                feed.stop();
                Err(FeedError::connect(endpoint, message))
            }
            Err(_) => {
                feed.stop();
                Err(FeedError::connect(endpoint, "connection timed out"))
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(endpoint = %self.endpoint, "event feed thread panicked");
            }
        }
    }
}

impl EventFeed for ZmqFeed {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        match self.messages.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FeedError::Closed),
        }
    }
}

impl Drop for ZmqFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
