use crate::connection::Connection;
use crate::heartbeat::Heartbeat;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct Entry {
    conn: Arc<Connection>,
    heartbeat: Option<Heartbeat>,
}

/// Live controller connections keyed by endpoint URL. Shared explicitly
/// between the poller, the command surface and logout.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces (and closes) any previous connection for the same URL.
    pub async fn insert(&self, url: &str, conn: Arc<Connection>, heartbeat: Option<Heartbeat>) {
        let previous = self
            .entries
            .lock()
            .await
            .insert(url.to_string(), Entry { conn, heartbeat });
        if let Some(previous) = previous {
            close_entry(url, previous).await;
        }
    }

    pub async fn get(&self, url: &str) -> Option<Arc<Connection>> {
        self.entries
            .lock()
            .await
            .get(url)
            .map(|entry| entry.conn.clone())
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.entries.lock().await.contains_key(url)
    }

    pub async fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    pub async fn remove(&self, url: &str) -> bool {
        let entry = self.entries.lock().await.remove(url);
        match entry {
            Some(entry) => {
                close_entry(url, entry).await;
                true
            }
            None => false,
        }
    }

    /// Cancels every heartbeat and closes every connection.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, Entry)> = self.entries.lock().await.drain().collect();
        let count = drained.len();
        for (url, entry) in drained {
            close_entry(&url, entry).await;
        }
        count
    }
}

async fn close_entry(url: &str, entry: Entry) {
    if let Some(heartbeat) = &entry.heartbeat {
        heartbeat.stop();
    }
    entry.conn.close().await;
    debug!(event = "registry_closed", url = url);
}
