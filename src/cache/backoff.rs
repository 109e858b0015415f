use std::thread::sleep;
use std::time::{Duration, Instant};

/// Time since the last retry after which a fresh sequence starts instead of continuing the
/// current backoff count.
const LAST_RETRY_INTERVAL: Duration = Duration::new(30, 0);

#[derive(Clone)]
pub struct Backoff {
    last_retry: Instant,
    tries: usize,
    initial_delay: Duration,
    max_retries: usize,
    last_retry_interval: Duration,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self {
            last_retry: Instant::now(),
            tries: 0,
            initial_delay: Duration::new(1, 0),
            max_retries: 0,
            last_retry_interval: LAST_RETRY_INTERVAL,
        }
    }

    pub(crate) fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub(crate) fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_last_retry_interval(mut self, last_retry_interval: Duration) -> Self {
        self.last_retry_interval = last_retry_interval;
        self
    }

    fn should_backoff(&mut self) -> bool {
        let duration = self.last_retry.elapsed();
        if duration > self.last_retry_interval {
            self.tries = 0
        }
        self.tries += 1;

        self.max_retries == 0 || self.tries <= self.max_retries
    }

    fn backoff<B, S>(&mut self, backoff_func: B, sleep_func: S)
    where
        B: FnOnce(usize, Duration, S),
        S: FnOnce(Duration),
    {
        backoff_func(self.tries, self.initial_delay, sleep_func);
        self.last_retry = Instant::now();
    }

    /// Convenience wrapper around `should_backoff`/`backoff(exponential, sleep)` for callers
    /// that retry on a transient conflict (e.g. `SQLITE_BUSY`) rather than a process exit code --
    /// same backoff shape, different trigger.
    pub(crate) fn should_retry_conflict(&mut self) -> bool {
        self.should_backoff()
    }

    pub(crate) fn backoff_conflict(&mut self) {
        self.backoff(exponential, sleep);
    }
}

/// Delay incrementing exponentially in base 2.
pub fn exponential<S>(tries: usize, initial_delay: Duration, sleep_func: S)
where
    S: FnOnce(Duration),
{
    let base: u32 = 2;
    sleep_func(initial_delay * base.pow(tries as u32 - 1));
}

/// Delay incrementing linearly with the retry count.
#[cfg(test)]
fn linear<S>(tries: usize, initial_delay: Duration, sleep_func: S)
where
    S: FnOnce(Duration),
{
    let total_secs_duration = tries as f32 * initial_delay.as_secs_f32();
    sleep_func(Duration::from_secs_f32(total_secs_duration));
}
