//! Signal handling for configuration reload and shutdown.
//!
//! Bridges OS signals with the async runtime: a `signal-hook` thread
//! forwards SIGHUP (reload) and SIGTERM/SIGINT (shutdown) into a channel
//! the controller awaits.

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Signal type for cross-thread communication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    /// Reload configuration (SIGHUP)
    Reload,
    /// Graceful shutdown (SIGTERM/SIGINT)
    Shutdown,
}

impl SignalType {
    pub fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            SIGHUP => Some(SignalType::Reload),
            SIGTERM | SIGINT => Some(SignalType::Shutdown),
            _ => None,
        }
    }
}

/// Receives OS signals on a dedicated thread and hands them to async code
pub struct SignalManager {
    tx: mpsc::UnboundedSender<SignalType>,
    rx: mpsc::UnboundedReceiver<SignalType>,
    handle: Option<Handle>,
}

impl SignalManager {
    pub fn new() -> Self {
        debug!("Creating signal manager");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            handle: None,
        }
    }

    /// Register for SIGHUP, SIGTERM and SIGINT
    pub fn install(&mut self) -> std::io::Result<()> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP])?;
        self.handle = Some(signals.handle());
        let tx = self.tx.clone();

        thread::Builder::new()
            .name("certpilot-signals".to_string())
            .spawn(move || {
                for raw in signals.forever() {
                    let Some(signal) = SignalType::from_raw(raw) else {
                        continue;
                    };
                    info!(signal = ?signal, "Received signal");
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
                trace!("Signal thread exiting");
            })?;

        Ok(())
    }

    /// Sender for injecting signals without the OS, used by tests and
    /// by in-process shutdown paths
    pub fn sender(&self) -> mpsc::UnboundedSender<SignalType> {
        self.tx.clone()
    }

    /// Next signal, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<SignalType> {
        let signal = self.rx.recv().await;
        if let Some(ref s) = signal {
            debug!(signal = ?s, "Dispatching signal");
        }
        signal
    }
}

impl Default for SignalManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SignalManager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_mapping() {
        assert_eq!(SignalType::from_raw(SIGHUP), Some(SignalType::Reload));
        assert_eq!(SignalType::from_raw(SIGTERM), Some(SignalType::Shutdown));
        assert_eq!(SignalType::from_raw(SIGINT), Some(SignalType::Shutdown));
        assert_eq!(SignalType::from_raw(0), None);
    }

    #[tokio::test]
    async fn test_injected_signals_are_delivered_in_order() {
        let mut manager = SignalManager::new();
        let sender = manager.sender();
        sender.send(SignalType::Reload).unwrap();
        sender.send(SignalType::Shutdown).unwrap();

        assert_eq!(manager.recv().await, Some(SignalType::Reload));
        assert_eq!(manager.recv().await, Some(SignalType::Shutdown));
    }
}
