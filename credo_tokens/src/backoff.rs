//! Backoff between failed renewal attempts

use std::time::Duration;

/// How long to wait after consecutive renewal failures
#[derive(Clone, Copy, Debug)]
pub struct ErrorBackoffConfig {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: u32,
}

impl Default for ErrorBackoffConfig {
    /// Waits 100 ms after the first failure, doubling on each further
    /// failure up to 15 seconds
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(15),
            multiplier: 2,
        }
    }
}

impl ErrorBackoffConfig {
    /// Constructs a new backoff configuration
    ///
    /// The first failure waits `initial_delay`. Each subsequent failure
    /// multiplies the previous delay by `multiplier`, never exceeding
    /// `max_delay`.
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
        }
    }
}

/// Tracks consecutive failures and the delay they call for
#[derive(Debug)]
pub struct ErrorBackoffHandler {
    config: ErrorBackoffConfig,
    last_delay: Option<Duration>,
}

impl ErrorBackoffHandler {
    /// Constructs a new handler
    pub fn new(config: ErrorBackoffConfig) -> Self {
        Self {
            config,
            last_delay: None,
        }
    }

    /// Reports a success, resetting the delay
    pub fn success(&mut self) {
        self.last_delay = None;
    }

    /// Reports a failure and returns how long to wait before trying again
    pub fn error(&mut self) -> Duration {
        let delay = match self.last_delay {
            Some(last) => last
                .saturating_mul(self.config.multiplier)
                .min(self.config.max_delay),
            None => self.config.initial_delay.min(self.config.max_delay),
        };
        self.last_delay = Some(delay);
        delay
    }

    /// Applies the outcome of an attempt, giving the delay alongside any error
    pub fn observe<T, E>(&mut self, result: Result<T, E>) -> Result<T, (E, Duration)> {
        match result {
            Ok(ok) => {
                self.success();
                Ok(ok)
            }
            Err(err) => Err((err, self.error())),
        }
    }
}

impl From<ErrorBackoffConfig> for ErrorBackoffHandler {
    fn from(config: ErrorBackoffConfig) -> Self {
        Self::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_until_capped() {
        let mut handler = ErrorBackoffHandler::from(ErrorBackoffConfig::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            2,
        ));

        let delays: Vec<_> = (0..5).map(|_| handler.error().as_secs()).collect();
        assert_eq!(delays, [1, 2, 4, 5, 5]);
    }

    #[test]
    fn success_resets_the_delay() {
        let mut handler = ErrorBackoffHandler::new(ErrorBackoffConfig::default());
        handler.error();
        handler.error();

        assert_eq!(handler.observe(Ok::<_, ()>(())), Ok(()));
        assert_eq!(
            handler.observe(Err::<(), _>("nope")),
            Err(("nope", Duration::from_millis(100)))
        );
    }
}
