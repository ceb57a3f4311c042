use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Pool-wide throttle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Idle,
    Throttled { until: Instant },
}

impl ThrottleState {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

/// Shared pause switch for every worker talking to the accrual provider.
///
/// Any worker may raise it; only the dispatcher clears it, and only once the
/// deadline has passed. Backed by a `watch` channel so that every clone sees
/// the latest state and can wait for it to change.
#[derive(Clone, Debug)]
pub struct ThrottleGate {
    state: Arc<watch::Sender<ThrottleState>>,
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ThrottleState::Idle);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn state(&self) -> ThrottleState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThrottleState> {
        self.state.subscribe()
    }

    /// Pauses the pool for `retry_after` from now. An existing pause is only
    /// ever extended, never shortened. Returns the effective deadline.
    pub fn raise(&self, retry_after: Duration) -> Instant {
        let requested = Instant::now() + retry_after;
        let mut effective = requested;
        self.state.send_modify(|state| {
            if let ThrottleState::Throttled { until } = *state
                && until > requested
            {
                effective = until;
            }
            *state = ThrottleState::Throttled { until: effective };
        });
        effective
    }

    /// Returns the gate to `Idle` if the pause has elapsed at `now`.
    pub(crate) fn clear_if_elapsed(&self, now: Instant) -> bool {
        self.state.send_if_modified(|state| match *state {
            ThrottleState::Throttled { until } if until <= now => {
                *state = ThrottleState::Idle;
                true
            }
            _ => false,
        });
        !self.state().is_throttled()
    }

    /// Resolves once the gate is `Idle`.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this never errors.
        let _ = rx.wait_for(|state| !state.is_throttled()).await;
    }

    /// Resolves once the gate is `Throttled`.
    pub async fn wait_throttled(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(ThrottleState::is_throttled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_raise_extends_but_never_shortens() {
        let gate = ThrottleGate::new();
        assert_eq!(gate.state(), ThrottleState::Idle);

        let long = gate.raise(Duration::from_secs(60));
        let effective = gate.raise(Duration::from_secs(5));
        assert_eq!(effective, long);
        assert_eq!(gate.state(), ThrottleState::Throttled { until: long });
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_only_after_deadline() {
        let gate = ThrottleGate::new();
        gate.raise(Duration::from_secs(60));

        assert!(!gate.clear_if_elapsed(Instant::now()));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(gate.clear_if_elapsed(Instant::now()));
        assert_eq!(gate.state(), ThrottleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_clone_waits_for_resumption() {
        let gate = ThrottleGate::new();
        gate.raise(Duration::from_secs(30));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move { gate.wait_idle().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_secs(31)).await;
        for waiter in &waiters {
            assert!(!waiter.is_finished());
        }

        gate.clear_if_elapsed(Instant::now());
        for waiter in waiters {
            waiter.await.unwrap();
        }
    }
}
