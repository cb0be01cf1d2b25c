//! Tick by tick replay of a loaded [`Module`]

use {
    crate::{
        NUM_VOICES,
        channel::VirtualChannel,
        features::{Effects, SpeedVariation, TrackDialect},
        module::{Module, SubSong},
        result::{PlayResult, PlaybackError},
    },
    std::sync::Arc,
};

mod effects;
mod track;
mod voice;

pub use voice::VoiceState;

/// State shared by all voices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalState {
    /// Tracks only advance on ticks where this is 0
    pub speed_variation_counter: i8,
    /// Current entry of the speed variation table
    pub speed_index: i8,
    /// Speed variation accumulator
    pub speed_variation2_counter: u8,
    /// Added to the accumulator every tick
    pub speed_variation2_speed: u8,
    /// Ticks until the master volume drops
    pub master_volume_fade_counter: i8,
    /// Ticks between master volume drops. Negative when not fading.
    pub master_volume_fade_speed: i8,
    /// Master volume, 0 to 64
    pub master_volume: u16,
    /// Added to every note
    pub global_transpose: i8,
}

impl GlobalState {
    pub(crate) const fn new(speed_init: u8) -> Self {
        Self {
            speed_variation_counter: 0,
            speed_index: 0,
            speed_variation2_counter: 255,
            speed_variation2_speed: speed_init,
            master_volume_fade_counter: 0,
            master_volume_fade_speed: -1,
            master_volume: 64,
            global_transpose: 0,
        }
    }
}

/// What happened during a [`Player::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Still playing
    Playing,
    /// Every voice reached the end of its position list, or the song was reset.
    ///
    /// Playback continues from the start on the next tick.
    SongEnded,
}

/// Module information lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoLine {
    /// Length of each voice's position list
    PositionLengths,
    /// Number of tracks
    UsedTracks,
    /// Number of samples
    UsedSamples,
    /// Current position of each voice
    PlayingPositions,
    /// Current track of each voice
    PlayingTracks,
}

impl InfoLine {
    /// Every line, in display order
    pub const ALL: [Self; 5] = [
        Self::PositionLengths,
        Self::UsedTracks,
        Self::UsedSamples,
        Self::PlayingPositions,
        Self::PlayingTracks,
    ];
    /// Label of the line
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::PositionLengths => "Number of positions:",
            Self::UsedTracks => "Used tracks:",
            Self::UsedSamples => "Used samples:",
            Self::PlayingPositions => "Playing positions:",
            Self::PlayingTracks => "Playing tracks:",
        }
    }
}

type InfoListener = Box<dyn FnMut(InfoLine, &str) + Send>;

/// Plays one sub-song of a module
pub struct Player {
    pub(crate) module: Arc<Module>,
    pub(crate) sub_song: usize,
    pub(crate) global: GlobalState,
    pub(crate) voices: [VoiceState; NUM_VOICES],
    pub(crate) channels_done: [bool; NUM_VOICES],
    pub(crate) song_ended: bool,
    parse_row: track::RowParser,
    between_rows: effects::Pipeline,
    on_row: effects::Pipeline,
    info_listener: Option<InfoListener>,
}

impl Player {
    /// Prepare `sub_song` of `module` for playback
    pub fn new(module: Arc<Module>, sub_song: usize) -> PlayResult<Self> {
        if sub_song >= module.sub_song_count() {
            return Err(PlaybackError::NoSuchSubSong(sub_song));
        }
        let features = *module.features();
        let mut player = Self {
            sub_song,
            global: GlobalState::new(module.speed_init),
            voices: std::array::from_fn(|_| VoiceState::new(features.track)),
            channels_done: [false; NUM_VOICES],
            song_ended: false,
            parse_row: features.track.parser(),
            between_rows: effects::between_rows(&features),
            on_row: effects::on_row(&features),
            info_listener: None,
            module,
        };
        player.init_voices()?;
        Ok(player)
    }
    /// The module being played
    #[must_use]
    pub const fn module(&self) -> &Arc<Module> {
        &self.module
    }
    /// The sub-song being played
    #[must_use]
    pub const fn sub_song(&self) -> usize {
        self.sub_song
    }
    /// Global playback state
    #[must_use]
    pub const fn global(&self) -> &GlobalState {
        &self.global
    }
    /// Playback state of each voice
    #[must_use]
    pub const fn voices(&self) -> &[VoiceState; NUM_VOICES] {
        &self.voices
    }
    /// Which voices reached the end of their position list since the song last ended
    #[must_use]
    pub const fn channels_done(&self) -> [bool; NUM_VOICES] {
        self.channels_done
    }
    /// Call `f` whenever the playing positions or tracks change
    pub fn set_info_listener(&mut self, f: impl FnMut(InfoLine, &str) + Send + 'static) {
        self.info_listener = Some(Box::new(f));
    }
    /// Stop notifying about position changes
    pub fn clear_info_listener(&mut self) {
        self.info_listener = None;
    }

    /// Advance playback by one tick, driving `channels`
    pub fn tick<C: VirtualChannel>(
        &mut self,
        channels: &mut [C; NUM_VOICES],
    ) -> PlayResult<TickStatus> {
        let module = Arc::clone(&self.module);
        let features = module.features();
        self.song_ended = false;
        self.master_volume_fade(channels)?;
        if features.speed_variation == SpeedVariation::Accumulator {
            self.speed_variation_accumulator();
        }
        for idx in 0..NUM_VOICES {
            let new_row = self.global.speed_variation_counter == 0 && {
                let voice = &mut self.voices[idx];
                voice.speed_counter = voice.speed_counter.wrapping_sub(1);
                voice.speed_counter2 = voice.speed_counter2.wrapping_add(1);
                voice.speed_counter == 0
            };
            if new_row {
                self.parse_track_row(idx, channels)?;
            }
            let pipeline = if new_row {
                &self.on_row
            } else {
                &self.between_rows
            };
            let voice = &mut self.voices[idx];
            for effect in pipeline {
                effect(&module, voice)?;
            }
        }
        if features.speed_variation == SpeedVariation::Table {
            self.speed_variation_table()?;
        }
        let gated = features.speed_variation == SpeedVariation::Accumulator;
        let envelopes = features.effects.contains(Effects::ENVELOPE);
        let v5 = features.track == TrackDialect::V5;
        for (voice, channel) in self.voices.iter().zip(channels.iter_mut()) {
            let period = (i32::from(voice.period) - i32::from(voice.fine_tune)).clamp(0, 0xffff);
            channel.set_period(period.unsigned_abs());
            let master = u32::from(self.global.master_volume);
            let volume = if envelopes {
                u32::from(voice.volume) * master / 64
            } else if gated
                && (voice.mute
                    || (!v5 && voice.speed_counter <= voice.max_speed_counter)
                    || (v5 && voice.speed_counter2 >= voice.max_speed_counter))
            {
                0
            } else {
                u32::from(voice.track_volume) * u32::from(voice.volume) * master / 4096
            };
            channel.set_volume(u16::try_from(volume).unwrap_or(u16::MAX));
        }
        if self.song_ended {
            log::trace!("Sub-song {} ended", self.sub_song);
            Ok(TickStatus::SongEnded)
        } else {
            Ok(TickStatus::Playing)
        }
    }

    fn current_sub_song(&self) -> &SubSong {
        &self.module.sub_songs[self.sub_song]
    }

    fn init_voices(&mut self) -> PlayResult {
        let dialect = self.module.features().track;
        for idx in 0..NUM_VOICES {
            self.voices[idx] = VoiceState::new(dialect);
            self.parse_next_position(idx, false)?;
        }
        Ok(())
    }

    fn stop_and_reset<C: VirtualChannel>(&mut self, channels: &mut [C; NUM_VOICES]) -> PlayResult {
        self.global.master_volume = 64;
        self.global.master_volume_fade_speed = -1;
        self.global.master_volume_fade_counter = 0;
        self.global.speed_variation_counter = 0;
        for channel in channels {
            channel.mute();
        }
        self.init_voices()?;
        self.song_ended = true;
        self.channels_done = [false; NUM_VOICES];
        Ok(())
    }

    fn end_reached(&mut self, idx: usize) {
        self.channels_done[idx] = true;
        if self.channels_done.iter().all(|&done| done) {
            self.song_ended = true;
            self.channels_done = [false; NUM_VOICES];
        }
    }

    fn master_volume_fade<C: VirtualChannel>(
        &mut self,
        channels: &mut [C; NUM_VOICES],
    ) -> PlayResult {
        let g = &mut self.global;
        if g.master_volume_fade_speed < 0 {
            return Ok(());
        }
        g.master_volume_fade_counter = g.master_volume_fade_counter.wrapping_sub(1);
        if g.master_volume_fade_counter < 0 {
            g.master_volume_fade_counter = g.master_volume_fade_speed;
            g.master_volume = g.master_volume.saturating_sub(1);
            if g.master_volume == 0 {
                self.stop_and_reset(channels)?;
            }
        }
        Ok(())
    }

    fn speed_variation_table(&mut self) -> PlayResult {
        let g = &mut self.global;
        g.speed_variation_counter = g.speed_variation_counter.wrapping_sub(1);
        if g.speed_variation_counter < 0 {
            g.speed_index = g.speed_index.wrapping_sub(1);
            if g.speed_index < 0 {
                g.speed_index = 7;
            }
            let table = &self.module.sub_songs[self.sub_song].speed_variation;
            g.speed_variation_counter = usize::try_from(g.speed_index)
                .ok()
                .and_then(|i| table.get(i))
                .copied()
                .ok_or(PlaybackError::Inconsistency("speed variation index"))?;
        }
        Ok(())
    }

    const fn speed_variation_accumulator(&mut self) {
        let g = &mut self.global;
        let (sum, overflow) = g
            .speed_variation2_counter
            .overflowing_add(g.speed_variation2_speed);
        g.speed_variation_counter = if overflow { 0 } else { -1 };
        g.speed_variation2_counter = sum;
    }

    /// Length of each voice's position list, in entries
    #[must_use]
    pub fn formatted_position_lengths(&self) -> String {
        self.current_sub_song()
            .position_lists
            .iter()
            .map(|list| (list.len() / 2).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
    /// Current position list entry of each voice
    #[must_use]
    pub fn formatted_position_string(&self) -> String {
        self.voices
            .iter()
            .zip(&self.current_sub_song().position_lists)
            .map(|(voice, list)| {
                let mut pos = i32::from(voice.position) + 1;
                if pos % 2 != 0 {
                    pos += 1;
                }
                pos = pos / 2 - 1;
                if pos < 0 {
                    pos = i32::try_from(list.len() / 2).unwrap_or(i32::MAX) - 1;
                }
                pos.to_string()
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
    /// Current track of each voice, `-` when between songs
    #[must_use]
    pub fn formatted_track_string(&self) -> String {
        self.voices
            .iter()
            .map(|voice| {
                if voice.track_number >= 0xfe {
                    "-".to_owned()
                } else {
                    voice.track_number.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
    /// Label and value of a module information line
    #[must_use]
    pub fn info_line(&self, line: InfoLine) -> (&'static str, String) {
        let value = match line {
            InfoLine::PositionLengths => self.formatted_position_lengths(),
            InfoLine::UsedTracks => self.module.track_count().to_string(),
            InfoLine::UsedSamples => self.module.samples.len().to_string(),
            InfoLine::PlayingPositions => self.formatted_position_string(),
            InfoLine::PlayingTracks => self.formatted_track_string(),
        };
        (line.description(), value)
    }

    pub(crate) fn notify_positions(&mut self) {
        if self.info_listener.is_none() {
            return;
        }
        let positions = self.formatted_position_string();
        let tracks = self.formatted_track_string();
        if let Some(listener) = &mut self.info_listener {
            listener(InfoLine::PlayingPositions, &positions);
            listener(InfoLine::PlayingTracks, &tracks);
        }
    }
}
