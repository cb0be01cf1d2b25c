//! Sub-song duration calculation and seek points

use {
    crate::{
        NUM_VOICES,
        channel::NullChannel,
        module::Module,
        player::{Player, TickStatus},
        result::DurationError,
        snapshot::Snapshot,
        timing::{PAL_TICK_RATE, Tick, TickRate, duration_to_ticks, ticks_to_duration},
    },
    std::{sync::Arc, time::Duration},
};

/// How to calculate durations
#[derive(Debug, Clone, Copy)]
pub struct DurationConfig {
    /// Ticks per second
    pub tick_rate: TickRate,
    /// Give up on a sub-song after this many ticks
    pub max_ticks: Tick,
    /// Time between seek points
    pub snapshot_interval: Duration,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            tick_rate: PAL_TICK_RATE,
            max_ticks: 30 * 60 * Tick::from(PAL_TICK_RATE),
            snapshot_interval: Duration::from_secs(5),
        }
    }
}

/// A point playback can jump to with [`Player::seek`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    /// Time from the start of the sub-song
    pub time: Duration,
    /// State right before the tick at `time` is played
    pub snapshot: Snapshot,
}

/// How long a sub-song plays before it ends
#[derive(Debug, Clone)]
pub struct SubSongDuration {
    /// The sub-song
    pub sub_song: usize,
    /// Number of ticks before the song starts over
    pub ticks: Tick,
    /// `ticks` as wall clock time
    pub duration: Duration,
    /// Seek points, in order, starting at time zero
    pub positions: Vec<PositionInfo>,
}

impl SubSongDuration {
    /// The last seek point at or before `time`
    #[must_use]
    pub fn position_at(&self, time: Duration) -> Option<&PositionInfo> {
        self.positions.iter().rev().find(|pos| pos.time <= time)
    }
}

/// Calculate the duration of every sub-song of `module`
pub fn calculate_durations(
    module: &Arc<Module>,
    config: &DurationConfig,
) -> Result<Vec<SubSongDuration>, DurationError> {
    (0..module.sub_song_count())
        .map(|sub_song| sub_song_duration(module, sub_song, config))
        .collect()
}

/// Calculate the duration of one sub-song, by playing it silently until it ends
pub fn sub_song_duration(
    module: &Arc<Module>,
    sub_song: usize,
    config: &DurationConfig,
) -> Result<SubSongDuration, DurationError> {
    let mut player = Player::new(Arc::clone(module), sub_song)?;
    let mut channels = [NullChannel::default(); NUM_VOICES];
    let interval = duration_to_ticks(config.snapshot_interval, config.tick_rate).max(1);
    let mut positions = Vec::new();
    for tick in 0..config.max_ticks {
        if tick % interval == 0 {
            positions.push(PositionInfo {
                time: ticks_to_duration(tick, config.tick_rate),
                snapshot: player.snapshot(),
            });
        }
        if player.tick(&mut channels)? == TickStatus::SongEnded {
            let duration = ticks_to_duration(tick, config.tick_rate);
            log::debug!(
                "Sub-song {sub_song}: {tick} ticks ({duration:?}), {} seek points",
                positions.len()
            );
            return Ok(SubSongDuration {
                sub_song,
                ticks: tick,
                duration,
                positions,
            });
        }
    }
    Err(DurationError::TickLimit {
        sub_song,
        ticks: config.max_ticks,
    })
}
