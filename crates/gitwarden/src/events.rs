//! Events recorded for sync cycles and the job notes they pick up.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::git::Commit;
use crate::notes::Note;
use crate::resource::ResourceId;
use crate::sync::ResourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Sync,
    Release,
    #[serde(rename = "autorelease")]
    AutoRelease,
    Policy,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Sync => write!(f, "sync"),
            EventType::Release => write!(f, "release"),
            EventType::AutoRelease => write!(f, "autorelease"),
            EventType::Policy => write!(f, "policy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// What kind of work a synced commit carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludeKind {
    Release,
    #[serde(rename = "autorelease")]
    AutoRelease,
    Policy,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventMetadata {
    /// Oldest first.
    pub commits: Vec<Commit>,
    pub includes: BTreeSet<IncludeKind>,
    pub initial_sync: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ResourceError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEventMetadata {
    pub revision: String,
    pub note: Note,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventMetadata {
    Sync(SyncEventMetadata),
    Note(NoteEventMetadata),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub resource_ids: BTreeSet<ResourceId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub log_level: LogLevel,
    pub metadata: EventMetadata,
}

impl Event {
    /// Event for one completed sync.
    pub fn sync(
        changed: BTreeSet<ResourceId>,
        started_at: DateTime<Utc>,
        metadata: SyncEventMetadata,
    ) -> Self {
        let log_level = if metadata.errors.is_empty() {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        Self {
            id: Uuid::new_v4(),
            event_type: EventType::Sync,
            resource_ids: changed,
            started_at,
            ended_at: Utc::now(),
            log_level,
            metadata: EventMetadata::Sync(metadata),
        }
    }

    /// Event for a job note found on a synced commit.
    pub fn from_note(revision: impl Into<String>, note: Note, started_at: DateTime<Utc>) -> Self {
        let log_level = if note.has_failures() {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        Self {
            id: Uuid::new_v4(),
            event_type: note.event_type(),
            resource_ids: note.resource_ids(),
            started_at,
            ended_at: Utc::now(),
            log_level,
            metadata: EventMetadata::Note(NoteEventMetadata {
                revision: revision.into(),
                note,
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Failed to record event: {0}")]
    Record(String),
}

/// Destination for events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn log_event(&self, event: Event) -> Result<(), EventError>;
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn log_event(&self, event: Event) -> Result<(), EventError> {
        let resources = event
            .resource_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match event.log_level {
            LogLevel::Info => {
                tracing::info!(event_id = %event.id, event_type = %event.event_type, resources = %resources, "event")
            }
            LogLevel::Warn => {
                tracing::warn!(event_id = %event.id, event_type = %event.event_type, resources = %resources, "event")
            }
            LogLevel::Error => {
                tracing::error!(event_id = %event.id, event_type = %event.event_type, resources = %resources, "event")
            }
        }
        Ok(())
    }
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventSink for BroadcastEventSink {
    async fn log_event(&self, event: Event) -> Result<(), EventError> {
        // No receivers is fine
        let _ = self.sender.send(event);
        Ok(())
    }
}
