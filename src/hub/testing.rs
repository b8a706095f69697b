//! In-memory transport for hub tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::connection::Transport;
use crate::error::{FlappyoError, Result};

/// Transport that records every frame it is asked to write
pub(crate) struct RecordingTransport {
    frames: mpsc::UnboundedSender<String>,
    broken: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Test-side view of a [`RecordingTransport`]
pub(crate) struct TransportMonitor {
    frames: mpsc::UnboundedReceiver<String>,
    broken: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

pub(crate) fn recording_transport() -> (RecordingTransport, TransportMonitor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let broken = Arc::new(AtomicBool::new(false));
    let stalled = Arc::new(AtomicBool::new(false));
    let closed = Arc::new(AtomicBool::new(false));

    let transport = RecordingTransport {
        frames: tx,
        broken: broken.clone(),
        stalled: stalled.clone(),
        closed: closed.clone(),
    };
    let monitor = TransportMonitor {
        frames: rx,
        broken,
        stalled,
        closed,
    };

    (transport, monitor)
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&mut self, payload: &str) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(FlappyoError::Transport("broken pipe".to_string()));
        }
        self.frames
            .send(payload.to_string())
            .map_err(|_| FlappyoError::Transport("monitor dropped".to_string()))?;

        if self.stalled.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl TransportMonitor {
    /// Make every further write fail, as if the peer went away
    pub(crate) fn disconnect(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Make every further write hang after its frame is recorded, as if the
    /// peer stopped reading
    pub(crate) fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait (bounded) for the next written frame
    pub(crate) async fn next_frame(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    /// Frames written so far, without waiting
    pub(crate) fn take_frames(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}
