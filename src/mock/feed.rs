//! In-memory event feed
//!
//! Publish/subscribe with the same delivery rules as the scheduler's
//! publisher: a message reaches only the subscriptions that exist when it is
//! published, with no replay.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use lava_protocol::{FeedMessage, JobStatus};
use serde_json::json;

use crate::monitor::{EventFeed, FeedConnector, FeedError};

const TOPIC: &[u8] = b"org.lavasoftware.testjob";

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<FeedMessage>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Queue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct Hub {
    subscribers: Vec<Arc<Queue>>,
    endpoints: Vec<String>,
    refuse: Option<String>,
}

/// Publisher side; clones share the same hub
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    hub: Arc<Mutex<Hub>>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a raw message to every current subscription
    pub fn publish(&self, message: FeedMessage) {
        let hub = self.hub.lock().unwrap();
        for queue in &hub.subscribers {
            let mut state = queue.state.lock().unwrap();
            if !state.closed {
                state.messages.push_back(message.clone());
                queue.ready.notify_all();
            }
        }
    }

    /// Publish a `{job, status}` event framed like the scheduler's
    pub fn publish_event(&self, job: u64, status: JobStatus) {
        self.publish_json(json!({"job": job, "status": status.as_str()}));
    }

    pub fn publish_json(&self, data: serde_json::Value) {
        self.publish(FeedMessage::new(vec![
            TOPIC.to_vec(),
            b"00000000-0000-0000-0000-000000000000".to_vec(),
            b"2024-01-01T00:00:00".to_vec(),
            b"lavaserver".to_vec(),
            data.to_string().into_bytes(),
        ]));
    }

    /// Publish a single frame as is
    pub fn publish_raw(&self, data: Vec<u8>) {
        self.publish(FeedMessage::data(data));
    }

    /// Close every subscription; their next receive fails once drained
    pub fn close(&self) {
        let hub = self.hub.lock().unwrap();
        for queue in &hub.subscribers {
            queue.state.lock().unwrap().closed = true;
            queue.ready.notify_all();
        }
    }

    /// Make subscribe calls fail
    pub fn refuse_connections(&self, message: impl Into<String>) {
        self.hub.lock().unwrap().refuse = Some(message.into());
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.lock().unwrap().subscribers.len()
    }

    /// Endpoints passed to `subscribe`, in order
    pub fn endpoints(&self) -> Vec<String> {
        self.hub.lock().unwrap().endpoints.clone()
    }
}

impl FeedConnector for MockFeed {
    fn subscribe(&self, endpoint: &str) -> Result<Box<dyn EventFeed>, FeedError> {
        let mut hub = self.hub.lock().unwrap();
        hub.endpoints.push(endpoint.to_string());
        if let Some(message) = &hub.refuse {
            return Err(FeedError::Connect {
                endpoint: endpoint.to_string(),
                message: message.clone(),
            });
        }
        let queue = Arc::new(Queue::default());
        hub.subscribers.push(queue.clone());
        Ok(Box::new(MockSubscription { queue }))
    }
}

/// Subscriber side
#[derive(Debug)]
pub struct MockSubscription {
    queue: Arc<Queue>,
}

impl EventFeed for MockSubscription {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        let until = Instant::now() + timeout;
        let mut state = self.queue.state.lock().unwrap();
        loop {
            if let Some(message) = state.messages.pop_front() {
                return Ok(Some(message));
            }
            if state.closed {
                return Err(FeedError::Closed);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(None);
            }
            state = self.queue.ready.wait_timeout(state, until - now).unwrap().0;
        }
    }
}
