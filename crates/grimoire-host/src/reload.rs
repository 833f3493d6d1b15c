use tokio::sync::watch;
use tracing::{error, info};

/// Number of reload requests received so far
///
/// Receivers compare against the last value they acted on, so requests that
/// arrive while a reload is running are coalesced instead of lost.
pub type ReloadGeneration = u64;

/// Spawn a SIGUSR2 listener and return a receiver that changes on every signal
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn setup_reload_signal() -> watch::Receiver<ReloadGeneration> {
    let (reload_tx, reload_rx) = watch::channel(0);

    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr2 = match signal(SignalKind::user_defined2()) {
            Ok(s) => s,
            Err(e) => {
                error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
                return;
            }
        };

        while sigusr2.recv().await.is_some() {
            info!(target: "scripting", "Received SIGUSR2, reloading scripts");
            reload_tx.send_modify(|generation| *generation += 1);

            if reload_tx.is_closed() {
                info!(target: "scripting", "Reload receiver dropped, stopping SIGUSR2 handler");
                break;
            }
        }
    });

    reload_rx
}

#[cfg(not(unix))]
pub fn setup_reload_signal() -> watch::Receiver<ReloadGeneration> {
    let (reload_tx, reload_rx) = watch::channel(0);
    tracing::warn!(target: "scripting", "SIGUSR2 reload is not supported on this platform");
    // Never sends, but the receiver must not observe a closed channel
    std::mem::forget(reload_tx);
    reload_rx
}

/// Manual trigger, used by the tick loop when the scanner sees changes
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: watch::Sender<ReloadGeneration>,
}

impl ReloadTrigger {
    pub fn new() -> (Self, watch::Receiver<ReloadGeneration>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx }, rx)
    }

    pub fn request(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_bumps_generation() {
        let (trigger, mut rx) = ReloadTrigger::new();
        assert_eq!(*rx.borrow_and_update(), 0);

        trigger.request();
        trigger.request();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 2);
        assert!(!rx.has_changed().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_receiver_starts_at_zero() {
        let rx = setup_reload_signal();
        assert_eq!(*rx.borrow(), 0);
    }
}
