//! Idle timer that locks a session once its deadline passes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

/// Shared, reschedulable deadline of one session.
#[derive(Clone)]
pub(crate) struct Deadline {
    tx: Arc<watch::Sender<Instant>>,
    timeout: Duration,
}

impl Deadline {
    /// Push the deadline to `now + timeout`.
    pub fn touch(&self) {
        self.tx.send_replace(Instant::now() + self.timeout);
    }

    pub fn expired(&self) -> bool {
        *self.tx.borrow() <= Instant::now()
    }
}

/// Timer task plus its deadline. Dropping it cancels the timer.
pub(crate) struct AutoLock {
    deadline: Deadline,
    timer: Option<JoinHandle<()>>,
}

impl AutoLock {
    /// Arm a timer that runs `on_expire` once the deadline passes without
    /// being pushed back. The timer stops when `on_expire` returns `true`;
    /// otherwise it waits for the next [`Deadline::touch`] and keeps going.
    pub fn spawn<F, Fut>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (tx, rx) = watch::channel(Instant::now() + timeout);
        let timer = tokio::spawn(watch_deadline(rx, on_expire));
        Self {
            deadline: Deadline {
                tx: Arc::new(tx),
                timeout,
            },
            timer: Some(timer),
        }
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    /// Let the timer task finish on its own instead of aborting it on drop.
    pub fn detach(&mut self) {
        self.timer.take();
    }
}

impl Drop for AutoLock {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn watch_deadline<F, Fut>(mut rx: watch::Receiver<Instant>, mut on_expire: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        let deadline = *rx.borrow_and_update();
        tokio::select! {
            _ = sleep_until(deadline) => {
                if *rx.borrow() > Instant::now() {
                    continue;
                }
                if on_expire().await {
                    return;
                }
                // Declined: wait until the deadline is pushed back.
                if rx.changed().await.is_err() {
                    return;
                }
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
