//! Per-session SSE fan-out (spec §4.5 "multiple subscribers per session
//! are permitted"). `POST /submit` pumps `run_turn`'s single-consumer
//! `mpsc::Receiver<TurnEvent>` into a `broadcast` channel registered here,
//! so any additional subscriber reading the same session's stream mid-turn
//! sees every event from that point on until `turn_done`/`error`.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::runtime::turn::TurnEvent;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
pub struct SseHub {
    channels: Mutex<HashMap<String, broadcast::Sender<TurnEvent>>>,
}

impl SseHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a session's live turn, if one is in flight.
    pub fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<TurnEvent>> {
        self.channels.lock().get(session_id).map(|tx| tx.subscribe())
    }

    /// Register a new broadcast channel for `session_id`, spawn a task that
    /// forwards every event from `rx` into it, and return a receiver for
    /// the caller (the client that made the `/submit` call). The channel
    /// is deregistered once `rx` closes (turn finished).
    pub fn publish(&self, session_id: String, mut rx: mpsc::Receiver<TurnEvent>, hub: std::sync::Arc<SseHub>) -> broadcast::Receiver<TurnEvent> {
        let (tx, first_rx) = broadcast::channel(CHANNEL_CAPACITY);
        self.channels.lock().insert(session_id.clone(), tx.clone());

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = tx.send(event);
            }
            hub.channels.lock().remove(&session_id);
        });

        first_rx
    }
}
