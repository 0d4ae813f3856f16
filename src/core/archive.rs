// src/core/archive.rs

//! Persists oversized decoded payloads to disk for later inspection.
//!
//! The receive loop offers every decoded payload here together with a
//! correlation id (message count and event name); the archiver decides on
//! its own whether the payload is worth persisting and never reports back.

use crate::config::ArchiveConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct PayloadArchiver {
    dir: PathBuf,
    min_len: usize,
    preview_len: usize,
}

impl PayloadArchiver {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            min_len: config.min_len,
            preview_len: config.preview_len,
        }
    }

    /// Creates the archive directory. Called once before the first offer.
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Offers one rendered payload. Persistence happens on a spawned task;
    /// the caller continues immediately.
    pub fn offer(self: &Arc<Self>, json: String, event_name: &str, message_count: u64) {
        let preview_end = json
            .char_indices()
            .nth(self.preview_len)
            .map_or(json.len(), |(i, _)| i);
        debug!(
            "Payload #{message_count} [{event_name}]: {}{}",
            &json[..preview_end],
            if preview_end < json.len() { "..." } else { "" }
        );

        if json.len() <= self.min_len {
            return;
        }

        let archiver = Arc::clone(self);
        let event_name = sanitize_event_name(event_name);
        tokio::spawn(async move {
            archiver.persist(json, event_name, message_count).await;
        });
    }

    async fn persist(&self, json: String, event_name: String, message_count: u64) {
        let path = self.dir.join(format!("message_{message_count:04}_{event_name}.json"));
        let size = json.len();
        match tokio::fs::write(&path, json).await {
            Ok(()) => info!("Archived payload ({size} chars) to {}", path.display()),
            Err(e) => error!("Failed to archive payload to {}: {e}", path.display()),
        }
    }
}

/// Event names come off the wire; keep file names boring.
fn sanitize_event_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
