use std::time::Duration;

use async_trait::async_trait;

/// Injectable stand-in for the grace-period `Sleep` suspension point
/// (§5). Kept separate from `fleet_types::collaborators::Clock` since
/// it models waiting, not reading a timestamp.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(any(test, feature = "test-fakes"))]
pub mod fakes {
    use super::*;
    use tokio::sync::Notify;

    /// Deterministic stand-in for `TokioSleeper`: `sleep` blocks until
    /// `fire` is called, regardless of the requested duration. Lets
    /// grace-period tests resolve the timer without real delays or a
    /// process-global `tokio::time::pause()` (the latter would make
    /// this crate's tests interfere with any other crate's timers
    /// running in the same test binary).
    #[derive(Default)]
    pub struct ManualSleeper {
        notify: Notify,
    }

    impl ManualSleeper {
        pub fn fire(&self) {
            self.notify.notify_one();
        }
    }

    #[async_trait]
    impl Sleeper for ManualSleeper {
        async fn sleep(&self, _duration: Duration) {
            self.notify.notified().await;
        }
    }
}
