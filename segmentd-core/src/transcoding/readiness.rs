//! Readiness gate for a coordinator
//!
//! A boolean plus a broadcast "became ready" signal. The signal is recreated
//! on every reset and fulfilled once by the next `set_ready`.

use tokio::sync::watch;
use tracing::{debug, info};

use super::guarded::Guarded;

#[derive(Debug)]
struct ReadinessState {
    ready: bool,
    signal: Option<watch::Sender<bool>>,
}

impl ReadinessState {
    fn pending() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            ready: false,
            signal: Some(sender),
        }
    }
}

/// Shared ready flag guarded by its own read/write lock
///
/// A reset discards the previous signal. Callers blocked in `wait_ready` on
/// the discarded signal observe it as closed and are told the gate was reset,
/// so resetting is only meaningful once earlier waiters have been served.
#[derive(Debug)]
pub struct ReadinessGate {
    state: Guarded<ReadinessState>,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by `wait_ready` when the gate was reset before becoming ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Readiness gate was reset while waiting")]
pub struct GateReset;

impl ReadinessGate {
    /// Creates a gate in the not-ready state with a pending signal.
    pub fn new() -> Self {
        Self {
            state: Guarded::new(ReadinessState::pending()),
        }
    }

    /// Marks the gate not ready and installs a fresh pending signal.
    pub fn reset(&self) {
        self.state.write_with(|state| *state = ReadinessState::pending());
        debug!("Readiness reset");
    }

    /// Marks the gate ready and fulfills the pending signal, if any.
    ///
    /// Calling this again while already ready is a no-op.
    pub fn set_ready(&self) {
        let signal = self.state.write_with(|state| {
            state.ready = true;
            state.signal.take()
        });

        if let Some(signal) = signal {
            signal.send_replace(true);
            info!("Coordinator ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.read_with(|state| state.ready)
    }

    /// Waits until the gate becomes ready.
    ///
    /// # Errors
    /// - `GateReset` - The signal being waited on was discarded by `reset`
    pub async fn wait_ready(&self) -> Result<(), GateReset> {
        let receiver = self.state.read_with(|state| {
            if state.ready {
                None
            } else {
                state.signal.as_ref().map(watch::Sender::subscribe)
            }
        });

        let Some(mut receiver) = receiver else {
            return Ok(());
        };

        match receiver.wait_for(|ready| *ready).await {
            Ok(_) => Ok(()),
            Err(_) => Err(GateReset),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[test]
    fn test_gate_starts_not_ready() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_ready());
    }

    #[test]
    fn test_set_ready_is_idempotent() {
        let gate = ReadinessGate::new();

        gate.set_ready();
        gate.set_ready();

        assert!(gate.is_ready());
        assert!(gate.state.read().signal.is_none());
    }

    #[test]
    fn test_reset_installs_fresh_signal() {
        let gate = ReadinessGate::new();
        gate.set_ready();

        gate.reset();

        assert!(!gate.is_ready());
        assert!(gate.state.read().signal.is_some());
    }

    #[tokio::test]
    async fn test_waiters_released_by_set_ready() {
        let gate = Arc::new(ReadinessGate::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.wait_ready().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.set_ready();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn test_wait_ready_returns_immediately_when_ready() {
        let gate = ReadinessGate::new();
        gate.set_ready();

        let result = timeout(Duration::from_millis(50), gate.wait_ready()).await;
        assert_eq!(result.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_reset_abandons_stale_waiters() {
        let gate = Arc::new(ReadinessGate::new());

        let stale = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.reset();

        assert_eq!(stale.await.unwrap(), Err(GateReset));
        assert!(!gate.is_ready());
    }
}
