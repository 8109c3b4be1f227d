use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};

/// Producer side of the redraw channel. Requests carry no payload; at most one
/// is ever pending and the rest are dropped.
#[derive(Debug, Clone)]
pub struct RedrawSignal {
    tx: mpsc::Sender<()>,
    dropped: Arc<AtomicU64>,
}

#[derive(Debug)]
pub struct RedrawReceiver {
    rx: mpsc::Receiver<()>,
}

pub fn redraw_channel() -> (RedrawSignal, RedrawReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (
        RedrawSignal {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        RedrawReceiver { rx },
    )
}

impl RedrawSignal {
    pub fn request(&self) {
        match self.tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(())) => {}
        }
    }

    /// Requests coalesced into an already pending one.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RedrawReceiver {
    /// Waits for the next request. `None` once every signal has been dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> bool {
        self.rx.try_recv().is_ok()
    }
}
