//! Synthetic module images for tests.
//!
//! [`ImageBuilder`] assembles a file that contains just enough replayer code for detection to
//! find every table and feature, followed by the tables themselves.

use crate::{
    NUM_SAMPLES,
    detect::Offsets,
    features::{
        Effects, Features, InstrumentLayout, PortamentoVibrato, SpeedVariation, TrackDialect,
        VibratoTable,
    },
    scan::MIN_MODULE_SIZE,
};

/// Sub-song description for [`ImageBuilder`]
#[derive(Debug, Clone)]
pub struct SubSongSpec {
    /// Raw position list bytes per voice, including the end marker
    pub position_lists: [Vec<u8>; 4],
    /// Speed variation table
    pub speed_variation: [i8; 8],
}

/// Sample description for [`ImageBuilder`]
#[derive(Debug, Clone, Default)]
pub struct SampleSpec {
    /// PCM data, an even number of bytes
    pub data: Vec<i8>,
    /// Loop start, stored as-is
    pub loop_start: u16,
    /// Loop length in words
    pub loop_length: u16,
}

/// Builds module images that [`identify`](crate::identify) recognizes.
///
/// Tables that were not given get a minimal default, so a fresh builder already produces a
/// loadable module.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    /// Features to encode into the replayer code
    pub features: Features,
    /// Initial speed of the speed variation accumulator
    pub speed_init: u8,
    /// Sub-songs
    pub sub_songs: Vec<SubSongSpec>,
    /// Raw track bytes. `None` makes an absent track.
    pub tracks: Vec<Option<Vec<u8>>>,
    /// Raw 16 byte envelope records
    pub envelopes: Vec<[u8; 16]>,
    /// Raw 16 byte instrument records
    pub instruments: Vec<[u8; 16]>,
    /// Samples, the rest up to [`NUM_SAMPLES`] are empty
    pub samples: Vec<SampleSpec>,
    /// Zero bytes between the code and the tables
    pub gap: usize,
}

/// A built image
#[derive(Debug, Clone)]
pub struct Image {
    /// The file contents
    pub data: Vec<u8>,
    /// Where the tables were put
    pub offsets: Offsets,
    /// Where the replayer code starts
    pub code_start: usize,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    SubSongs,
    PositionLists,
    Instruments,
    Global,
    TrackOffsets,
    Tracks,
    SampleStarts,
    SampleData,
    SampleInfo,
    Envelopes,
}

#[derive(Default)]
struct Code {
    bytes: Vec<u8>,
    fixups: Vec<(usize, Target)>,
}

impl Code {
    fn op(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
    fn nops(&mut self, count: usize) {
        for _ in 0..count {
            self.op(&[0x4e, 0x71]);
        }
    }
    fn disp(&mut self, target: Target) {
        self.fixups.push((self.bytes.len(), target));
        self.op(&[0, 0]);
    }
}

const LAYOUT_BLOCK_LEN: usize = 42;

fn write_disp(data: &mut [u8], at: usize, target: usize) {
    let disp = i16::try_from(target.cast_signed() - at.cast_signed())
        .unwrap_or_else(|_| panic!("Displacement from {at:#x} to {target:#x} doesn't fit"));
    data[at..at + 2].copy_from_slice(&disp.to_be_bytes());
}

fn align(data: &mut Vec<u8>) {
    if data.len() % 2 != 0 {
        data.push(0);
    }
}

impl ImageBuilder {
    /// Position of the init routine's `BSR` relative to the code start
    pub const BSR_AT: usize = 12;
    /// Zero bytes in front of the replayer code
    pub const CODE_START: usize = 0x20;

    /// Create a builder for a replayer with the given features
    #[must_use]
    pub const fn new(features: Features) -> Self {
        Self {
            features,
            speed_init: 0,
            sub_songs: Vec::new(),
            tracks: Vec::new(),
            envelopes: Vec::new(),
            instruments: Vec::new(),
            samples: Vec::new(),
            gap: 0,
        }
    }
    /// Add a sub-song
    #[must_use]
    pub fn sub_song(mut self, position_lists: [Vec<u8>; 4], speed_variation: [i8; 8]) -> Self {
        self.sub_songs.push(SubSongSpec {
            position_lists,
            speed_variation,
        });
        self
    }
    /// Add a track
    #[must_use]
    pub fn track(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.tracks.push(Some(bytes.into()));
        self
    }
    /// Add a track offset table entry that is marked absent
    #[must_use]
    pub fn absent_track(mut self) -> Self {
        self.tracks.push(None);
        self
    }
    /// Add an instrument record
    #[must_use]
    pub fn instrument(mut self, record: [u8; 16]) -> Self {
        self.instruments.push(record);
        self
    }
    /// Add an envelope record
    #[must_use]
    pub fn envelope(mut self, record: [u8; 16]) -> Self {
        self.envelopes.push(record);
        self
    }
    /// Add a sample
    #[must_use]
    pub fn sample(mut self, data: Vec<i8>, loop_start: u16, loop_length: u16) -> Self {
        self.samples.push(SampleSpec {
            data,
            loop_start,
            loop_length,
        });
        self
    }
    /// Set the initial accumulator speed
    #[must_use]
    pub const fn speed_init(mut self, speed: u8) -> Self {
        self.speed_init = speed;
        self
    }
    /// Put `gap` zero bytes between the code and the tables
    #[must_use]
    pub const fn gap(mut self, gap: usize) -> Self {
        self.gap = gap;
        self
    }

    fn code(&self) -> Code {
        let f = &self.features;
        let mut c = Code::default();
        // Init
        c.op(&[0x48, 0xe7, 0xfc, 0xfe]);
        c.op(&[0xe9, 0x41, 0x70, 0x00, 0x41, 0xfa]);
        c.disp(Target::SubSongs);
        c.op(&[0x61, 0x00]);
        let bsr_disp = c.bytes.len();
        c.op(&[0, 0]);
        c.op(&[0x4e, 0x75]);
        let sub = c.bytes.len();
        c.op(&[0x7a, 0x00, 0x4e, 0x71, 0x4e, 0x71, 0x49, 0xfa]);
        c.disp(Target::PositionLists);
        c.op(&[0x4e, 0x75]);
        // The code is position independent, so this can be patched right away
        let bsr = u16::try_from(sub - bsr_disp).unwrap_or_default();
        c.bytes[bsr_disp..bsr_disp + 2].copy_from_slice(&bsr.to_be_bytes());
        // Play
        c.op(&[0x4b, 0xfa]);
        c.disp(Target::Instruments);
        c.op(&[0x43, 0xfa]);
        c.disp(Target::Global);
        c.op(&[0x2c, 0x7c, 0x00, 0xdf, 0xf0, 0x00, 0x4a, 0x29, 0x00, 0x10]);
        c.op(&[0x53, 0x69, 0x00, 0x02, 0x67, 0x00]);
        match f.speed_variation {
            SpeedVariation::Table => {
                c.op(&[0x70, 0x03]);
                c.nops(4);
            }
            SpeedVariation::Accumulator => {
                c.op(&[0x7a, 0x00]);
                c.nops(2);
                // The initial speed is the second byte of the global block
                c.op(&[0xda, 0x29, 0x00, 0x01]);
            }
        }
        c.op(&[0x7a, 0x00, 0x1a, 0x31, 0x00, 0x00, 0xda, 0x45, 0x49, 0xfa]);
        c.disp(Target::TrackOffsets);
        c.op(&[0x3a, 0x34, 0x00, 0x00, 0x49, 0xfa]);
        c.disp(Target::Tracks);
        let branch = if f.effects.contains(Effects::RESET_VOLUME) {
            0x66
        } else {
            0x60
        };
        c.op(&[0x18, 0x31, 0x00, 0x00, branch, 0x00]);
        c.op(&[0x42, 0x31, 0x00, 0x00]);
        c.nops(2);
        c.op(match f.track {
            TrackDialect::V1 => &[0x08, 0x31],
            TrackDialect::V2 => &[0x4a, 0x34],
            TrackDialect::V3 => &[0x1a, 0x34],
            TrackDialect::V4 | TrackDialect::V5 => &[0x42, 0x30],
        });
        if f.track == TrackDialect::V5 {
            c.op(&[0x0c, 0x05, 0x00, 0x84]);
        } else {
            c.nops(2);
        }
        c.op(&[0x31, 0x85, 0x00, 0x00]);
        let layout: &[[u8; 2]] = match f.instruments {
            InstrumentLayout::V1 => &[[0x13, 0x02], [0x13, 0x07], [0x13, 0x0f]],
            InstrumentLayout::V2 => &[[0x11, 0x01], [0x13, 0x02], [0x13, 0x07], [0x13, 0x0f]],
            InstrumentLayout::V3 => &[
                [0x11, 0x01],
                [0x13, 0x02],
                [0x13, 0x03],
                [0x31, 0x04],
                [0x33, 0x06],
                [0x13, 0x08],
                [0x13, 0x0f],
            ],
        };
        let block = c.bytes.len();
        for &[op, field] in layout {
            let ea = if op == 0x33 { 0x75 } else { 0xb5 };
            c.op(&[op, ea, 0x50, field]);
            c.nops(1);
        }
        c.nops((LAYOUT_BLOCK_LEN - (c.bytes.len() - block)) / 2);
        c.op(&[0xe5, 0x45, 0x45, 0xfa]);
        c.disp(Target::SampleStarts);
        c.nops(2);
        c.op(&[0x45, 0xfa]);
        c.disp(Target::SampleData);
        if f.effects.contains(Effects::SEPARATE_SAMPLE_INFO) {
            c.nops(6);
            c.op(&[0xca, 0xfc, 0x00, 0x06, 0x45, 0xfa]);
            c.disp(Target::SampleInfo);
        } else {
            c.nops(10);
        }
        c.op(&[0x6b, 0x00, 0x00, 0x00, 0x4a, 0x31, 0x00, 0x00, 0x4e, 0x71]);
        c.op(match f.portamento_vibrato {
            PortamentoVibrato::OnlyOne => &[0x7a, 0x00, 0x00, 0x00],
            PortamentoVibrato::BothTogether => &[0x53, 0x31, 0x00, 0x00],
        });
        c.op(&[0xda, 0x45]);
        c.op(&[0x9b, 0x70]);
        c.nops(1);
        match f.vibrato {
            VibratoTable::Halving => {
                c.op(&[0x53, 0x31]);
                c.nops(2);
            }
            VibratoTable::Division => {
                c.nops(2);
                c.op(&[0x8a, 0xf1]);
            }
        }
        let chain = [
            (Effects::SET_NOTE, 1),
            (Effects::SET_FIXED_SAMPLE, 2),
            (Effects::SET_ARPEGGIO, 3),
            (Effects::SET_SAMPLE, 4),
            (Effects::ARPEGGIO, 5),
        ];
        let mut blocks = 0;
        for (flag, bit) in chain {
            if f.effects.contains(flag) {
                c.op(&[0x08, 0x31, 0x00, bit, 0x00, 0x00, 0x67, 0x02, 0x4e, 0x71]);
                blocks += 1;
            }
        }
        if blocks == 0 {
            // A block for an effect that doesn't matter to detection
            c.op(&[0x08, 0x31, 0x00, 0x00, 0x00, 0x00, 0x67, 0x02, 0x4e, 0x71]);
        }
        if f.effects.contains(Effects::ENVELOPE) {
            c.op(&[0x4e, 0x71, 0x4e, 0x71, 0x6b, 0x00, 0x4a, 0x31]);
            c.op(&[0xe9, 0x44, 0x31, 0x84, 0x00, 0x00, 0x45, 0xfa]);
            c.disp(Target::Envelopes);
        } else {
            c.nops(4);
        }
        c.op(&[0x4e, 0x75]);
        c
    }

    /// Assemble the image.
    ///
    /// # Panics
    ///
    /// If the tables are too big for the replayer's 16 bit displacements.
    #[must_use]
    pub fn build(&self) -> Image {
        let f = &self.features;
        let code = self.code();
        let code_start = Self::CODE_START;
        let mut data = vec![0; code_start];
        data.extend_from_slice(&code.bytes);
        align(&mut data);
        data.resize(data.len() + self.gap, 0);

        let global = data.len();
        data.extend([0, self.speed_init]);

        let default_song = [SubSongSpec {
            position_lists: std::array::from_fn(|_| vec![0x01, 0x00, 0xff, 0x00]),
            speed_variation: [0; 8],
        }];
        let sub_songs = if self.sub_songs.is_empty() {
            &default_song[..]
        } else {
            &self.sub_songs[..]
        };
        let sub_song_list = data.len();
        let mut list_offset = 0usize;
        for song in sub_songs {
            for list in &song.position_lists {
                let off = u16::try_from(list_offset).unwrap_or(u16::MAX);
                data.extend(off.to_be_bytes());
                list_offset += list.len();
            }
            data.extend(song.speed_variation.map(i8::cast_unsigned));
        }
        let position_lists = data.len();
        for song in sub_songs {
            for list in &song.position_lists {
                data.extend_from_slice(list);
            }
        }
        align(&mut data);

        let envelopes = f.effects.contains(Effects::ENVELOPE).then(|| {
            let at = data.len();
            if self.envelopes.is_empty() {
                data.extend([0; 16]);
            }
            for env in &self.envelopes {
                data.extend_from_slice(env);
            }
            at
        });
        let instruments = data.len();
        if self.instruments.is_empty() {
            data.extend([0; 16]);
        }
        for instr in &self.instruments {
            data.extend_from_slice(instr);
        }

        let default_tracks = [Some(vec![0xff])];
        let tracks = if self.tracks.is_empty() {
            &default_tracks[..]
        } else {
            &self.tracks[..]
        };
        let track_offsets = data.len();
        let mut track_offset = 0usize;
        for track in tracks {
            match track {
                Some(bytes) => {
                    let off = i16::try_from(track_offset).unwrap_or(i16::MAX);
                    data.extend(off.to_be_bytes());
                    track_offset += bytes.len();
                }
                None => data.extend((-1i16).to_be_bytes()),
            }
        }
        let track_data = data.len();
        for bytes in tracks.iter().flatten() {
            data.extend_from_slice(bytes);
        }
        align(&mut data);

        let empty = SampleSpec::default();
        let samples: Vec<&SampleSpec> = (0..NUM_SAMPLES)
            .map(|i| self.samples.get(i).unwrap_or(&empty))
            .collect();
        let separate = f.effects.contains(Effects::SEPARATE_SAMPLE_INFO);
        let header = |s: &SampleSpec| {
            let len = u16::try_from(s.data.len() / 2).unwrap_or(u16::MAX);
            let mut h = [0; 6];
            h[..2].copy_from_slice(&len.to_be_bytes());
            h[2..4].copy_from_slice(&s.loop_start.to_be_bytes());
            h[4..].copy_from_slice(&s.loop_length.to_be_bytes());
            h
        };
        let sample_info = separate.then(|| {
            let at = data.len();
            for s in &samples {
                data.extend(header(s));
            }
            at
        });
        let sample_start_offsets = data.len();
        let mut start = 0u32;
        let chunk_len = |s: &SampleSpec| {
            let pcm = u32::try_from(s.data.len()).unwrap_or(u32::MAX);
            if pcm == 0 || separate { pcm } else { pcm + 6 }
        };
        for s in &samples {
            data.extend(start.to_be_bytes());
            start += chunk_len(s);
        }
        data.extend(start.to_be_bytes());
        let sample_data = data.len();
        for s in &samples {
            if s.data.is_empty() {
                continue;
            }
            if !separate {
                data.extend(header(s));
            }
            data.extend(s.data.iter().map(|b| b.cast_unsigned()));
        }
        if data.len() < MIN_MODULE_SIZE {
            data.resize(MIN_MODULE_SIZE, 0);
        }

        for &(at, target) in &code.fixups {
            let target = match target {
                Target::SubSongs => sub_song_list,
                Target::PositionLists => position_lists,
                Target::Instruments => instruments,
                Target::Global => global,
                Target::TrackOffsets => track_offsets,
                Target::Tracks => track_data,
                Target::SampleStarts => sample_start_offsets,
                Target::SampleData => sample_data,
                Target::SampleInfo => sample_info.unwrap_or_default(),
                Target::Envelopes => envelopes.unwrap_or_default(),
            };
            write_disp(&mut data, code_start + at, target);
        }

        Image {
            data,
            offsets: Offsets {
                sub_song_list,
                position_lists,
                track_offsets,
                tracks: track_data,
                envelopes,
                instruments,
                sample_info,
                sample_start_offsets,
                sample_data,
                speed_init: (f.speed_variation == SpeedVariation::Accumulator)
                    .then_some(global + 1),
            },
            code_start,
        }
    }
}

/// Deterministic xorshift generator for fuzzing loops
#[derive(Debug, Clone)]
pub struct XorShift(u64);

impl XorShift {
    /// Create a generator. A zero seed is replaced, since it would only ever yield zeros.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed })
    }
    /// Next raw value
    pub const fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
    /// A value in `0..n`. `n` must not be 0.
    pub fn below(&mut self, n: usize) -> usize {
        let n = u64::try_from(n).unwrap_or(u64::MAX);
        usize::try_from(self.next_u64() % n).unwrap_or_default()
    }
    /// A random byte
    pub const fn byte(&mut self) -> u8 {
        self.next_u64().to_le_bytes()[0]
    }
    /// `len` random bytes
    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.byte()).collect()
    }
}
