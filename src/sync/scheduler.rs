//! Single-slot debounce timer.
//!
//! At most one timer is live. Arming cancels the previous timer and starts a
//! new one; each arming gets a fresh generation so a fire that lost a race
//! with a newer arm can be recognised and ignored.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub struct DebounceTimer {
    delay: Duration,
    generation: u64,
    armed: bool,
    handle: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: 0,
            armed: false,
            handle: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// (Re)start the timer. When it elapses, `make_fire(generation)` is
    /// spawned as its own task, so cancelling or re-arming the timer never
    /// interrupts a flush that has already begun.
    pub fn arm<F, Fut>(&mut self, make_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
        self.armed = true;
        let generation = self.generation;
        let delay = self.delay;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(make_fire(generation));
        }));
        generation
    }

    /// Called by the fire task. Returns true if `generation` is still the
    /// live timer, in which case the slot is released.
    pub fn fired(&mut self, generation: u64) -> bool {
        if self.armed && generation == self.generation {
            self.armed = false;
            self.handle = None;
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.armed = false;
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    type Fire = Pin<Box<dyn Future<Output = ()> + Send>>;

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl Fn(u64) -> Fire + Send + Sync) {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        let make = move |generation: u64| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().push(generation);
            }) as Fire
        };
        (fired, make)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_restarts_delay() {
        let (fired, make) = recorder();
        let make = Arc::new(make);
        let mut timer = DebounceTimer::new(Duration::from_millis(550));

        let m = make.clone();
        timer.arm(move |g| m(g));
        tokio::time::sleep(Duration::from_millis(400)).await;
        let m = make.clone();
        let second = timer.arm(move |g| m(g));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*fired.lock().unwrap(), vec![second]);
        assert!(timer.fired(second));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let (fired, make) = recorder();
        let mut timer = DebounceTimer::new(Duration::from_millis(100));
        timer.arm(make);
        timer.cancel();
        assert!(!timer.is_armed());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut timer = DebounceTimer::new(Duration::from_millis(100));
        timer.armed = true;
        timer.generation = 3;
        assert!(!timer.fired(2));
        assert!(timer.is_armed());
        assert!(timer.fired(3));
        assert!(!timer.fired(3));
    }
}
