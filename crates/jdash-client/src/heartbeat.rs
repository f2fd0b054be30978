use crate::connection::Connection;
use crate::facades;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A running keep-alive timer. Dropping the handle cancels it.
pub struct Heartbeat {
    task: JoinHandle<()>,
    stopped: watch::Receiver<bool>,
}

impl Heartbeat {
    /// Flips to `true` when a ping failed and the timer gave up.
    pub fn stopped_signal(&self) -> watch::Receiver<bool> {
        self.stopped.clone()
    }

    pub fn has_failed(&self) -> bool {
        *self.stopped.borrow()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Ping every `interval`. The first ping goes out one interval after start.
/// A failed ping stops the timer; reconnecting is the caller's decision.
pub fn start_heartbeat(conn: Arc<Connection>, interval: Duration) -> Heartbeat {
    let (stopped_tx, stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            ticker.tick().await;
            match facades::ping(&conn).await {
                Ok(()) => debug!(event = "ping_ok", url = %conn.url()),
                Err(err) => {
                    warn!(event = "pinger_stopped", url = %conn.url(), error = %err);
                    let _ = stopped_tx.send(true);
                    return;
                }
            }
        }
    });
    Heartbeat { task, stopped }
}
