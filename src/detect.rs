use crate::{
    features::{self, Effects, Features},
    result::{DetectError, DetectResult},
    scan::{self, MIN_MODULE_SIZE, RTS, Scanner, Sig},
};

/// Absolute offsets of the data tables of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offsets {
    /// Sub-song records
    pub sub_song_list: usize,
    /// Base of the position lists
    pub position_lists: usize,
    /// Track offset table
    pub track_offsets: usize,
    /// Base of the track data
    pub tracks: usize,
    /// Volume envelopes, if the replayer has them
    pub envelopes: Option<usize>,
    /// Instrument records
    pub instruments: usize,
    /// Separate sample length/loop table, if the replayer has one
    pub sample_info: Option<usize>,
    /// Sample start offset table
    pub sample_start_offsets: usize,
    /// Base of the sample data
    pub sample_data: usize,
    /// Initial speed of the speed variation accumulator
    pub speed_init: Option<usize>,
}

impl Offsets {
    /// Every table offset, for validation
    fn all(&self) -> impl Iterator<Item = usize> {
        [
            Some(self.sub_song_list),
            Some(self.position_lists),
            Some(self.track_offsets),
            Some(self.tracks),
            self.envelopes,
            Some(self.instruments),
            self.sample_info,
            Some(self.sample_start_offsets),
            Some(self.sample_data),
            self.speed_init,
        ]
        .into_iter()
        .flatten()
    }
}

/// Result of a successful [`identify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    /// Where the tables are
    pub offsets: Offsets,
    /// How the replayer behaves
    pub features: Features,
}

/// A scan step that didn't succeed
enum Miss {
    /// The file is not a module. Not an error.
    NotFound,
    Broken(DetectError),
}

impl From<DetectError> for Miss {
    fn from(e: DetectError) -> Self {
        Self::Broken(e)
    }
}

trait Found<T> {
    fn found(self) -> Result<T, Miss>;
}

impl<T> Found<T> for Option<T> {
    fn found(self) -> Result<T, Miss> {
        self.ok_or(Miss::NotFound)
    }
}

type Step<T> = Result<T, Miss>;

const fn sig2(a: u8, b: u8) -> [Option<u8>; 2] {
    [Some(a), Some(b)]
}

/// `LSL.W #4,d1` `MOVEQ #0,d0` `LEA d(PC),a0`: indexes the sub-song list
const SUB_SONG_LIST: &Sig = &[
    Some(0xe9),
    Some(0x41),
    Some(0x70),
    Some(0x00),
    Some(0x41),
    Some(0xfa),
];
/// `BSR.W`
const BSR: &Sig = &sig2(0x61, 0x00);
/// `MOVE.L #custom,a6` `TST.B d(a1)`: the start of the play routine
const PLAY: &Sig = &[
    Some(0x2c),
    Some(0x7c),
    None,
    None,
    None,
    None,
    Some(0x4a),
    Some(0x29),
];
const LEA_A5: &Sig = &sig2(0x4b, 0xfa);
const LEA_A1: &Sig = &sig2(0x43, 0xfa);
const TRACK_OFFSETS: &Sig = &[
    Some(0x7a),
    Some(0x00),
    Some(0x1a),
    Some(0x31),
    None,
    None,
    Some(0xda),
    Some(0x45),
    Some(0x49),
    Some(0xfa),
];
const TRACK_DATA: &Sig = &[Some(0x3a), Some(0x34), None, None, Some(0x49), Some(0xfa)];
/// `CLR.B d(a1,d3)`, a few instructions before the track parser dispatch
const CLEAR_VOICE: &Sig = &sig2(0x42, 0x31);
const SAMPLE_TABLES: &Sig = &[Some(0xe5), Some(0x45), Some(0x45), Some(0xfa)];
const PORTAMENTO_VIBRATO: &Sig = &[Some(0x6b), Some(0x00), None, None, Some(0x4a), Some(0x31)];
const ADD_D5: &Sig = &sig2(0xda, 0x45);
const VIBRATO: &Sig = &sig2(0x9b, 0x70);

/// Try to recognize a module.
///
/// `data` is the whole file. Only the first [`SCAN_WINDOW`](crate::SCAN_WINDOW) bytes are
/// searched for the replayer, but the tables it refers to must lie inside `data`.
///
/// Returns `Ok(None)` for anything that is not a module, which is the expected outcome for
/// most files.
///
/// # Errors
///
/// Only if the detector's own invariants are violated.
pub fn identify(data: &[u8]) -> DetectResult<Option<Detection>> {
    if data.len() < MIN_MODULE_SIZE {
        return Ok(None);
    }
    let window = scan::scan_window(data);
    match scan_module(&window) {
        Ok(det) => {
            if let Some(off) = det.offsets.all().find(|&off| off >= data.len()) {
                log::debug!("Table offset {off:#x} is outside of the file");
                return Ok(None);
            }
            log::debug!("Detected: {:x?}", det.offsets);
            log::debug!("Features: {:?}", det.features);
            Ok(Some(det))
        }
        Err(Miss::NotFound) => Ok(None),
        Err(Miss::Broken(e)) => Err(e),
    }
}

fn scan_module(buf: &[u8]) -> Step<Detection> {
    let start = scan::find_start(buf).found()?;
    log::trace!("Replayer code at {start:#x}");
    let (sub_song_list, position_lists) = scan_init(buf, start)?;
    let play = scan_play(buf, start)?;
    Ok(Detection {
        offsets: Offsets {
            sub_song_list,
            position_lists,
            track_offsets: play.track_offsets,
            tracks: play.tracks,
            envelopes: play.envelopes,
            instruments: play.instruments,
            sample_info: play.sample_info,
            sample_start_offsets: play.sample_start_offsets,
            sample_data: play.sample_data,
            speed_init: play.speed_init,
        },
        features: play.features,
    })
}

/// The init routine addresses the sub-song list, and calls a subroutine that addresses the
/// position lists.
fn scan_init(buf: &[u8], start: usize) -> Step<(usize, usize)> {
    let mut sc = Scanner::new(buf, start);
    let at = sc.find(SUB_SONG_LIST, 6).found()?;
    let sub_song_list = sc.rel_offset(at + 6).found()?;
    let bsr = sc.find_with_stop(BSR, RTS, 4).found()?;
    let target = sc
        .rel_offset(bsr + 2)
        .filter(|&target| target < buf.len())
        .found()?;
    // The subroutine gets a scanner of its own, the init scan ends here
    let sub = Scanner::new(buf, target);
    if !sub.matches(0, &sig2(0x7a, 0x00)) || !sub.matches(6, &sig2(0x49, 0xfa)) {
        return Err(Miss::NotFound);
    }
    let position_lists = sub.rel_offset(target + 8).found()?;
    Ok((sub_song_list, position_lists))
}

struct PlayInfo {
    track_offsets: usize,
    tracks: usize,
    envelopes: Option<usize>,
    instruments: usize,
    sample_info: Option<usize>,
    sample_start_offsets: usize,
    sample_data: usize,
    speed_init: Option<usize>,
    features: Features,
}

fn scan_play(buf: &[u8], start: usize) -> Step<PlayInfo> {
    let mut sc = Scanner::new(buf, start);
    let play = sc.find(PLAY, 8).found()?;
    let [instr_at, global_at] = play
        .checked_sub(4)
        .and_then(|from| sc.look_behind(from, [LEA_A5, LEA_A1]))
        .found()?;
    let instruments = sc.rel_offset(instr_at + 2).found()?;
    let global = sc.rel_offset(global_at + 2).found()?;

    sc.find(features::SPEED_VARIATION, 16).found()?;
    let (speed_variation, speed_init) = features::speed_variation(&sc, global).found()?;
    sc.seek(sc.cursor() + 8)?;

    let at = sc.find(TRACK_OFFSETS, 12).found()?;
    let track_offsets = sc.rel_offset(at + 10).found()?;
    sc.advance(12, 8)?.found()?;
    if !sc.matches(0, TRACK_DATA) {
        return Err(Miss::NotFound);
    }
    let tracks = sc.rel_offset(sc.cursor() + 6).found()?;
    sc.seek(sc.cursor() + 8)?;

    let mut effects = Effects::empty();
    sc.find(features::RESET_VOLUME, 6).found()?;
    effects.set(Effects::RESET_VOLUME, features::reset_volume(&sc));
    sc.seek(sc.cursor() + 6)?;

    sc.find(CLEAR_VOICE, 10).found()?;
    sc.seek(sc.cursor() + 8)?;
    let track = features::track_dialect(&mut sc)?.found()?;
    sc.find(features::STORE_POSITION, 2).found()?;
    sc.advance(4, 16)?.found()?;
    let instrument_layout = features::instrument_layout(&sc).found()?;

    let at = sc.find(SAMPLE_TABLES, 14).found()?;
    let sample_start_offsets = sc.rel_offset(at + 4).found()?;
    if !sc.matches(10, &sig2(0x45, 0xfa)) {
        return Err(Miss::NotFound);
    }
    let sample_data = sc.rel_offset(at + 12).found()?;
    sc.advance(14, 20)?.found()?;
    let sample_info = match features::separate_sample_info(&sc) {
        Some(at) => {
            effects |= Effects::SEPARATE_SAMPLE_INFO;
            let offset = sc.rel_offset(at).found()?;
            sc.seek(at)?;
            Some(offset)
        }
        None => None,
    };

    sc.find(PORTAMENTO_VIBRATO, 12).found()?;
    sc.seek(sc.cursor() + 10)?;
    let portamento_vibrato = features::portamento_vibrato(&sc).found()?;
    sc.find(ADD_D5, 2).found()?;
    sc.find(VIBRATO, 10).found()?;
    let vibrato = features::vibrato_table(&sc).found()?;
    sc.seek(sc.cursor() + 10)?;

    effects |= features::effect_chain(&mut sc)?.found()?;
    let envelopes = if features::has_envelope(&mut sc)?.found()? {
        effects |= Effects::ENVELOPE;
        let at = features::envelope_table(&mut sc).found()?;
        Some(sc.rel_offset(at).found()?)
    } else {
        None
    };

    Ok(PlayInfo {
        track_offsets,
        tracks,
        envelopes,
        instruments,
        sample_info,
        sample_start_offsets,
        sample_data,
        speed_init,
        features: Features {
            track,
            instruments: instrument_layout,
            speed_variation,
            vibrato,
            portamento_vibrato,
            effects,
        },
    })
}
