#![doc = include_str!("../README.md")]
// When we return an error type, the possible errors are encoded within it.
#![allow(clippy::missing_errors_doc)]

pub mod channel;
mod detect;
mod duration;
mod features;
mod io;
mod module;
mod player;
mod result;
mod scan;
mod snapshot;
pub mod tables;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod timing;

pub use {
    channel::{ChannelCommand, NullChannel, RecordingChannel, VirtualChannel},
    detect::{Detection, Offsets, identify},
    duration::{
        DurationConfig, PositionInfo, SubSongDuration, calculate_durations, sub_song_duration,
    },
    features::{
        Effects, Features, InstrumentEffects, InstrumentLayout, PortamentoVibrato,
        SpeedVariation, TrackDialect, VibratoTable,
    },
    module::{
        ENVELOPE_POINTS, Envelope, EnvelopePoint, Instrument, MAX_POSITION_LIST_LEN, Module,
        Sample, SampleInfo, SampleLoop, SubSong, load, load_detected,
    },
    player::{GlobalState, InfoLine, Player, TickStatus, VoiceState},
    result::{
        DetectError, DetectResult, DurationError, LoadError, LoadResult, PlayResult,
        PlaybackError, Section,
    },
    scan::{MIN_MODULE_SIZE, SCAN_WINDOW},
    snapshot::Snapshot,
};

/// Number of voices (Paula channels) a module plays on
pub const NUM_VOICES: usize = 4;
/// Number of sample slots every module has
pub const NUM_SAMPLES: usize = 27;
/// File extensions modules are commonly stored with
pub const FILE_EXTENSIONS: [&str; 2] = ["avp", "mw"];
/// Human readable name of the format
pub const FORMAT_NAME: &str = "Activision Pro";
