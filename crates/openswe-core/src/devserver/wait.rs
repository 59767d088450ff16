//! Generic retry-until-timeout primitive.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Call `check` every `interval` until it yields `Some` or `timeout` elapses.
///
/// `check` always runs at least once, and once more at the deadline.
/// Returns `None` on timeout.
pub async fn poll_until<T, F, Fut>(interval: Duration, timeout: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_value() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = poll_until(Duration::from_secs(1), Duration::from_secs(10), move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            (n == 3).then_some(n)
        })
        .await;
        assert_eq!(value, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = Instant::now();
        let value: Option<()> =
            poll_until(Duration::from_secs(1), Duration::from_millis(2500), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            })
            .await;
        assert_eq!(value, None);
        // t = 0, 1, 2, 2.5
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_checks_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value: Option<()> = poll_until(Duration::from_secs(1), Duration::ZERO, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })
        .await;
        assert!(value.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
