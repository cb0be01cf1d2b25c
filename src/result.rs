use {std::fmt, thiserror::Error};

/// Part of the module a [`LoadError`] happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Global player information (speed variation)
    Info,
    /// The sub-song list
    SubSongs,
    /// A position list of a sub-song
    PositionList,
    /// Track offsets or track data
    Tracks,
    /// Volume envelopes
    Envelopes,
    /// Instrument records
    Instruments,
    /// Separate sample information table
    SampleInfo,
    /// Sample start offsets or sample data
    Samples,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "module information",
            Self::SubSongs => "sub-song",
            Self::PositionList => "position list",
            Self::Tracks => "track",
            Self::Envelopes => "envelope",
            Self::Instruments => "instrument",
            Self::SampleInfo => "sample information",
            Self::Samples => "sample",
        })
    }
}

/// Error that can happen when loading a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The file does not contain a replayer this crate knows about
    #[error("Not an Activision Pro module")]
    NotRecognized,
    /// The file ended before a table was completely read
    #[error("Can't read {0} data: file is truncated")]
    Truncated(Section),
    /// A table is inconsistent with the tables around it
    #[error("Can't read {0} data: table is malformed")]
    Malformed(Section),
    /// Detection itself failed
    #[error(transparent)]
    Detect(#[from] DetectError),
}

/// Internal invariant of the detector was violated.
///
/// A file that simply isn't a module is never an error, see [`identify`](crate::identify).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DetectError {
    /// A scan step resolved to a position before an already confirmed anchor
    #[error("Signature scan moved backwards ({from:#x} -> {to:#x})")]
    Backtrack {
        /// Cursor before the step
        from: usize,
        /// Position the step wanted to move to
        to: usize,
    },
}

/// Error that can happen during playback.
///
/// These only happen if a module passed loading but still references data outside its
/// tables. The playing session should be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// Playback indexed outside of a loaded table
    #[error("Internal inconsistency: {0}")]
    Inconsistency(&'static str),
    /// The requested sub-song doesn't exist
    #[error("Sub-song {0} doesn't exist")]
    NoSuchSubSong(usize),
}

/// Error that can happen while calculating sub-song durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DurationError {
    /// Playback failed
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    /// The song didn't end within the configured amount of ticks
    #[error("Sub-song {sub_song} didn't end within {ticks} ticks")]
    TickLimit {
        /// The offending sub-song
        sub_song: usize,
        /// The tick limit that was hit
        ticks: u32,
    },
}

/// Result of attempting to load a module
pub type LoadResult<T = ()> = Result<T, LoadError>;

/// Result of detection
pub type DetectResult<T> = Result<T, DetectError>;

/// Result of a playback operation
pub type PlayResult<T = ()> = Result<T, PlaybackError>;
