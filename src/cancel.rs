use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::KiraError;

/// Caller-owned cancellation signal shared by every operation of a session.
///
/// Clones observe the same flag. `wait` doubles as an interruptible sleep so
/// poll loops wake up as soon as the token fires.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, condvar) = &*self.inner;
        if let Ok(mut cancelled) = flag.lock() {
            *cancelled = true;
        }
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        flag.lock().map(|cancelled| *cancelled).unwrap_or(true)
    }

    pub fn check(&self) -> Result<(), KiraError> {
        if self.is_cancelled() {
            return Err(KiraError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps for `duration` unless cancelled first.
    pub fn wait(&self, duration: Duration) -> Result<(), KiraError> {
        let (flag, condvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut cancelled = flag.lock().map_err(|_| KiraError::Cancelled)?;
        loop {
            if *cancelled {
                return Err(KiraError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (guard, _) = condvar
                .wait_timeout(cancelled, deadline - now)
                .map_err(|_| KiraError::Cancelled)?;
            cancelled = guard;
        }
    }
}
