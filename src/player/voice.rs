use crate::{
    features::{InstrumentEffects, TrackDialect},
    module::{Instrument, Module},
    result::{PlayResult, PlaybackError},
};

/// Playback state of one voice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceState {
    /// Ticks until the next track row
    pub speed_counter: u8,
    /// Ticks since the last track row
    pub speed_counter2: u8,
    /// Gate length for the accumulator speed variation
    pub max_speed_counter: u8,
    /// Ticks since the note started
    pub tick_counter: u8,

    /// Cursor into the position list. Points at the track byte of the current entry.
    pub position: i8,
    /// Inside a position list loop
    pub loop_enabled: bool,
    /// Loop repetitions left
    pub loop_count: u8,
    /// Where the position list loop restarts
    pub loop_start: i8,
    /// Current track. `0xFE` and `0xFF` are the reset and restart markers.
    pub track_number: u8,
    /// Cursor into the track
    pub track_position: usize,
    /// How many more times the current track is played
    pub loop_track_counter: u8,

    /// Current note
    pub note: u8,
    /// Note and "don't retrigger" flag (bit 7)
    pub note_and_flag: u8,
    /// Transpose of the playing instrument
    pub transpose: i8,
    /// Fine tune of the playing instrument
    pub fine_tune: i16,
    /// Period before fine tune
    pub period: u16,

    /// Instrument selected by the track
    pub instrument_number: Option<u8>,
    /// Instrument whose note is playing
    pub instrument: Option<u8>,
    /// Sample number of the playing note
    pub sample: u8,
    /// Effects of the playing instrument
    pub effects: InstrumentEffects,
    /// Set once the reset delay ran out
    pub stop_reset_effect: bool,
    /// Ticks until the set sample and arpeggio effects stop
    pub stop_reset_delay: u8,

    /// Envelope in use
    pub envelope: Option<u8>,
    /// Current point of the envelope
    pub envelope_position: u8,
    /// Ticks until the next volume change. Negative when halted.
    pub envelope_wait: i8,
    /// Volume changes left on the current point
    pub envelope_loop_count: u8,

    /// Silenced by a track command
    pub mute: bool,
    /// Note volume
    pub volume: u16,
    /// Volume set by the track
    pub track_volume: u8,
    /// Portamento value, 0 for none
    pub portamento: u8,

    /// Period change per vibrato tick
    pub vibrato_speed: u16,
    /// Ticks before vibrato starts
    pub vibrato_delay: u8,
    /// Non-negative until the vibrato is set up
    pub vibrato_depth: i8,
    /// Period moves down when set
    pub vibrato_direction: bool,
    /// Counting back towards zero
    pub vibrato_count_direction: bool,
    /// Ticks per vibrato swing
    pub vibrato_counter_max: u8,
    /// Ticks into the current swing
    pub vibrato_counter: u8,
}

impl VoiceState {
    /// Fresh state, before the first position is parsed
    pub(super) fn new(dialect: TrackDialect) -> Self {
        let default_instrument = dialect.has_default_instrument().then_some(0);
        Self {
            speed_counter: 1,
            position: -1,
            track_volume: 64,
            instrument_number: default_instrument,
            instrument: default_instrument,
            ..Self::default()
        }
    }
    /// The instrument whose note is playing, if one has ever played
    pub(super) fn instrument<'m>(&self, module: &'m Module) -> PlayResult<Option<&'m Instrument>> {
        self.instrument
            .map(|n| {
                module
                    .instruments
                    .get(usize::from(n))
                    .ok_or(PlaybackError::Inconsistency("instrument out of range"))
            })
            .transpose()
    }
}
