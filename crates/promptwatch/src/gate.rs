//! Single-flight admission control and debounce coalescing.
//!
//! [`FlowGate`] decides whether a watched-file change may start a new
//! cycle. [`debounce`] turns a burst of raw notifications into one trigger.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace};

/// Default quiet period before a burst of notifications becomes a trigger.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct GateState {
    blocked: bool,
    last_content: Option<String>,
}

/// Shared by the orchestrator (which blocks) and the recorder (which
/// releases at the end of a cycle).
#[derive(Debug)]
pub struct FlowGate {
    filter_duplicates: bool,
    state: Mutex<GateState>,
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FlowGate {
    pub fn new(filter_duplicates: bool) -> Self {
        Self {
            filter_duplicates,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Admit `content` unless a cycle is in flight or it repeats the last
    /// admitted body. Does not block; the caller does that.
    pub fn try_admit(&self, content: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.blocked {
            trace!("Gate blocked; change dropped");
            return false;
        }
        if self.filter_duplicates && state.last_content.as_deref() == Some(content) {
            debug!("Content unchanged since last cycle; change dropped");
            return false;
        }
        state.last_content = Some(content.to_string());
        true
    }

    pub fn block(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.blocked {
            state.blocked = true;
            debug!("Gate blocked");
        }
    }

    pub fn unblock(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.blocked {
            state.blocked = false;
            debug!("Gate released");
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).blocked
    }
}

/// Wait for a notification, then keep absorbing further ones until
/// `window` passes without any. Returns the last notification received, or
/// `None` once the channel is closed and drained.
pub async fn debounce<T>(rx: &mut UnboundedReceiver<T>, window: Duration) -> Option<T> {
    let mut latest = rx.recv().await?;
    let mut absorbed = 0usize;
    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(item) => {
                    latest = item;
                    absorbed += 1;
                }
                None => break,
            },
            _ = tokio::time::sleep(window) => break,
        }
    }
    trace!("Debounced {} notification(s)", absorbed + 1);
    Some(latest)
}
