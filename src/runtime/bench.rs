//! Wall-clock timing of kernel launches.
//!
//! One warmup launch absorbs first-use costs (cache population, lazy
//! module upload), then a synchronized run of timed repetitions. The
//! caller serializes candidates on one stream; overlapping launches
//! would corrupt the comparison.

use std::time::{Duration, Instant};

use crate::driver::Stream;
use crate::error::Result;

const TIMED_REPS: u32 = 10;

/// Average wall time of one launch, synchronized on both sides.
pub fn bench(mut launch: impl FnMut() -> Result<()>, stream: &dyn Stream) -> Result<Duration> {
    launch()?;
    stream.synchronize()?;
    let start = Instant::now();
    for _ in 0..TIMED_REPS {
        launch()?;
    }
    stream.synchronize()?;
    Ok(start.elapsed() / TIMED_REPS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NullStream;
    impl Stream for NullStream {
        fn synchronize(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_counts_warmup_separately() {
        let mut calls = 0u32;
        bench(
            || {
                calls += 1;
                std::thread::sleep(Duration::from_micros(100));
                Ok(())
            },
            &NullStream,
        )
        .unwrap();
        assert_eq!(calls, 1 + TIMED_REPS);
    }

    #[test]
    fn test_launch_error_propagates() {
        let err = bench(
            || Err(crate::Error::GridRankExceeded(4)),
            &NullStream,
        )
        .unwrap_err();
        assert_eq!(err, crate::Error::GridRankExceeded(4));
    }
}
