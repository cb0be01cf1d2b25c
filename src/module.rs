use crate::{
    NUM_VOICES,
    detect::Detection,
    features::{Features, InstrumentEffects},
    tables::{NOTE_FREQUENCIES, NUM_NOTES},
};

mod load;
pub use load::{load, load_detected};

/// Number of points in an [`Envelope`], including the trailing sentinel
pub const ENVELOPE_POINTS: usize = 6;

/// Position lists are walked with an 8 bit signed cursor, so they can't be longer than this
pub const MAX_POSITION_LIST_LEN: usize = 128;

/// A sub-song
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubSong {
    /// Position list of each voice.
    ///
    /// Entries are `(repeat count, track)` pairs, with loop, fade and end markers mixed in.
    pub position_lists: [Vec<u8>; NUM_VOICES],
    /// Extra wait ticks, cycled through backwards by the table speed variation
    pub speed_variation: [i8; 8],
}

/// An instrument
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Instrument {
    /// Sample played on note start
    pub sample: u8,
    /// Volume envelope number
    pub envelope: u8,
    /// Volume, for replayers without envelopes
    pub volume: u8,
    /// Which effects run for this instrument
    pub effects: InstrumentEffects,
    /// Note transpose
    pub transpose: i8,
    /// Subtracted from the output period
    pub fine_tune: i16,
    /// Where playback starts inside the sample
    pub sample_start_offset: u16,
    /// Added to the period by the fixed sample effect
    pub portamento_add: u8,
    /// Ticks until the set sample and arpeggio effects stop
    pub stop_reset_delay: u8,
    /// Sample used by the set sample effect
    pub sample2: u8,
    /// Arpeggio notes. Positive values are absolute notes, negative ones are relative.
    pub arpeggio: [i8; 4],
    /// Note alternated with by the set note effect. With bit 7 set, it is relative.
    pub fixed_note: u8,
    /// Vibrato table entry, 0 for none
    pub vibrato_number: u8,
    /// Ticks before vibrato starts
    pub vibrato_delay: u8,
}

/// A step of an [`Envelope`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopePoint {
    /// Ticks between volume changes. Values from `0xC0` jump to another point.
    pub ticks_to_wait: u8,
    /// Added to the volume on each change
    pub volume_increment: i8,
    /// Number of volume changes before moving on
    pub times_to_repeat: u8,
}

/// A volume envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Five stored points, followed by a sentinel that holds the volume
    pub points: [EnvelopePoint; ENVELOPE_POINTS],
}

/// A sample
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Signed 8 bit PCM
    pub data: Vec<i8>,
    /// Length in words
    pub length: u16,
    /// Loop start, as stored in the module
    pub loop_start: u16,
    /// Loop length in words. 1 means no loop.
    pub loop_length: u16,
}

/// A loaded module.
///
/// Immutable once loaded. Players share it through an [`Arc`](std::sync::Arc).
#[derive(Debug, Clone)]
pub struct Module {
    /// What detection found
    pub detection: Detection,
    /// Initial speed of the speed variation accumulator
    pub speed_init: u8,
    /// The sub-songs, at least one
    pub sub_songs: Vec<SubSong>,
    /// Track bytecode, ending in `0xFF`. `None` for tracks that the offset table marks absent.
    pub tracks: Vec<Option<Vec<u8>>>,
    /// Volume envelopes, empty if the replayer has none
    pub envelopes: Vec<Envelope>,
    /// Instruments
    pub instruments: Vec<Instrument>,
    /// Always [`NUM_SAMPLES`](crate::NUM_SAMPLES) samples
    pub samples: Vec<Sample>,
}

/// Loop of a [`SampleInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLoop {
    /// Start of the loop
    pub start: u32,
    /// Length of the loop in bytes
    pub length: u32,
}

/// Sample description for a host that wants to show or export samples
#[derive(Debug, Clone, Copy)]
pub struct SampleInfo<'a> {
    /// Sample number
    pub index: usize,
    /// Signed 8 bit PCM
    pub data: &'a [i8],
    /// Length in bytes
    pub length: u32,
    /// Loop, if the sample has one
    pub looping: Option<SampleLoop>,
    /// Playback frequency of each note
    pub note_frequencies: &'static [u32; NUM_NOTES],
}

impl Module {
    /// What the replayer supports
    #[must_use]
    pub const fn features(&self) -> &Features {
        &self.detection.features
    }
    /// Number of sub-songs
    #[must_use]
    pub const fn sub_song_count(&self) -> usize {
        self.sub_songs.len()
    }
    /// Number of entries in the track offset table
    #[must_use]
    pub const fn track_count(&self) -> usize {
        self.tracks.len()
    }
    /// Describe the samples
    pub fn sample_infos(&self) -> impl Iterator<Item = SampleInfo<'_>> {
        self.samples.iter().enumerate().map(|(index, sample)| SampleInfo {
            index,
            data: &sample.data,
            length: u32::from(sample.length) * 2,
            looping: (sample.loop_length > 1).then(|| SampleLoop {
                start: u32::from(sample.loop_start),
                length: u32::from(sample.loop_length) * 2,
            }),
            note_frequencies: &NOTE_FREQUENCIES,
        })
    }
}
