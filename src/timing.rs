//! Timing related definitions and utilities
use std::time::Duration;

/// Playback ticks.
///
/// A tick is one call to [`Player::tick`](crate::Player::tick).
pub type Tick = u32;

/// How many ticks happen per second.
pub type TickRate = u16;

/// Tick rate of the vertical blank interrupt on a PAL Amiga, which drives the replayer.
pub const PAL_TICK_RATE: TickRate = 50;

/// Converts [`Tick`]s to wall clock time.
#[must_use]
pub fn ticks_to_duration(ticks: Tick, rate: TickRate) -> Duration {
    Duration::from_nanos(u64::from(ticks) * 1_000_000_000 / u64::from(rate.max(1)))
}

/// Converts wall clock time to whole [`Tick`]s, rounding down.
#[must_use]
pub fn duration_to_ticks(duration: Duration, rate: TickRate) -> Tick {
    // Saturates on absurd durations
    Tick::try_from(duration.as_nanos() * u128::from(rate) / 1_000_000_000).unwrap_or(Tick::MAX)
}

#[test]
fn test_tick_conversion() {
    assert_eq!(ticks_to_duration(100, PAL_TICK_RATE), Duration::from_secs(2));
    assert_eq!(duration_to_ticks(Duration::from_secs(3), PAL_TICK_RATE), 150);
    assert_eq!(duration_to_ticks(Duration::from_millis(30), PAL_TICK_RATE), 1);
    assert_eq!(ticks_to_duration(3, PAL_TICK_RATE), Duration::from_millis(60));
}
