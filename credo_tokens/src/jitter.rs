//! Jitter applied to renewal times so many clients do not renew at once

use credo_clock::UnixTime;

/// A source of jitter for renewal times
pub trait JitterSource {
    /// Jitters a given time
    fn jitter(&mut self, time: UnixTime) -> UnixTime;
}

/// Leaves times as they are
#[derive(Debug)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        time
    }
}

#[cfg(feature = "rand")]
mod random {
    use credo_clock::{DurationSecs, UnixTime};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Moves times earlier by a random amount
    ///
    /// Jittered times are uniformly distributed in `(time - max_jitter, time]`.
    #[derive(Debug)]
    pub struct RandomEarlyJitter<R = StdRng> {
        max_jitter: DurationSecs,
        rng: R,
    }

    impl RandomEarlyJitter {
        /// Constructs a jitter source moving times earlier by up to `max_jitter`
        pub fn new(max_jitter: DurationSecs) -> Self {
            Self::with_rng(max_jitter, StdRng::from_entropy())
        }
    }

    impl<R> RandomEarlyJitter<R> {
        /// Constructs a jitter source drawing from the provided generator
        pub fn with_rng(max_jitter: DurationSecs, rng: R) -> Self {
            Self { max_jitter, rng }
        }
    }

    impl<R: Rng> super::JitterSource for RandomEarlyJitter<R> {
        fn jitter(&mut self, time: UnixTime) -> UnixTime {
            if self.max_jitter.0 == 0 {
                return time;
            }

            let jitter = self.rng.gen_range(0..self.max_jitter.0);
            time - DurationSecs(jitter)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::jitter::JitterSource;

        #[test]
        fn jitter_stays_within_bounds() {
            let mut jitter =
                RandomEarlyJitter::with_rng(DurationSecs(10), StdRng::seed_from_u64(7));
            for _ in 0..100 {
                let t = jitter.jitter(UnixTime(1_000));
                assert!(t > UnixTime(990) && t <= UnixTime(1_000), "{t:?} out of range");
            }
        }

        #[test]
        fn zero_jitter_is_identity() {
            let mut jitter = RandomEarlyJitter::new(DurationSecs(0));
            assert_eq!(jitter.jitter(UnixTime(1_000)), UnixTime(1_000));
        }
    }
}

#[cfg(feature = "rand")]
pub use random::RandomEarlyJitter;
