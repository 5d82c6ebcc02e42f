//! Invalidation Bus - cross-instance cache coherence
//!
//! Every successful save or delete publishes an [`Invalidation`] on a named
//! channel. Listeners in other instances wait for the settle delay, evict
//! the object, and on SAVE fetch it again.
//!
//! Wire format (JSON):
//! ```json
//! {"updateType":"SAVE","tableName":"users","objectId":"1"}
//! ```

pub(crate) mod listener;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel name
pub const DEFAULT_CHANNEL: &str = "rowcache-update";

/// Kind of change an invalidation announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    Save,
    Delete,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Save => "SAVE",
            UpdateType::Delete => "DELETE",
        }
    }
}

impl FromStr for UpdateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "SAVE" => Ok(UpdateType::Save),
            "DELETE" => Ok(UpdateType::Delete),
            _ => Err(Error::Mapping(format!("Unknown update type: {}", s))),
        }
    }
}

impl std::fmt::Display for UpdateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One invalidation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    pub update_type: UpdateType,
    pub table_name: String,
    pub object_id: String,
}

impl Invalidation {
    pub fn new(update_type: UpdateType, table_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            update_type,
            table_name: table_name.into(),
            object_id: object_id.into(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// A message as carried by a bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub channel: String,
    /// Node id of the publishing registry
    pub origin: Uuid,
    /// JSON-encoded [`Invalidation`]
    pub payload: String,
}

/// Publish/subscribe transport shared by cooperating registries.
pub trait InvalidationBus: Send + Sync + 'static {
    fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Receive every envelope published after this call
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// In-process bus. Registries sharing one `LocalBus` behave like
/// cooperating processes sharing a message broker.
#[derive(Debug)]
pub struct LocalBus {
    sender: broadcast::Sender<Envelope>,
}

impl LocalBus {
    const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Arc<Self> {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl InvalidationBus for LocalBus {
    fn publish(&self, envelope: Envelope) -> Result<()> {
        // No subscribers is not an error: nobody needs invalidating.
        let _ = self.sender.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}
