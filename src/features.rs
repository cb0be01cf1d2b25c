//! Classification of replayer variants.
//!
//! Every release of the replayer was assembled from slightly different sources. The
//! differences that matter for loading and playback are recognized by looking at a few
//! instructions next to the anchors found by the signature scan.

use crate::{
    result::DetectResult,
    scan::{Scanner, Sig},
};

/// How a track's bytecode is laid out, and which commands it knows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDialect {
    /// Speed in the low 6 bits of the first byte, one argument for commands
    V1,
    /// Commands set instrument and volume/portamento, and carry two arguments
    V2,
    /// Chained commands `80`..`8e`
    V3,
    /// Chained commands, with mute and speed variation control
    V4,
    /// Like [`V4`](Self::V4), with global transpose and a changed command numbering
    V5,
}

impl TrackDialect {
    /// Whether the dialect starts out with instrument 0 selected
    #[must_use]
    pub const fn has_default_instrument(self) -> bool {
        matches!(self, Self::V3 | Self::V4 | Self::V5)
    }
    /// Whether notes and commands are chained, with the speed after the note
    #[must_use]
    pub const fn is_chained(self) -> bool {
        matches!(self, Self::V4 | Self::V5)
    }
}

/// Layout of the 16 byte instrument records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentLayout {
    /// Envelope number in the second byte
    V1,
    /// Volume in the second byte
    V2,
    /// Volume, transpose, fine tune and sample start offset
    V3,
}

/// How the replayer slows down the tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedVariation {
    /// Each sub-song has an 8 entry table of extra wait ticks, cycled backwards
    Table,
    /// An 8 bit accumulator; tracks only advance on ticks where it overflows
    Accumulator,
}

/// How the vibrato step is derived from the note distance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VibratoTable {
    /// Halve the distance to the next note as many times as the depth says
    Halving,
    /// Divide the distance to the next note by the depth
    Division,
}

/// Whether portamento and vibrato exclude each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortamentoVibrato {
    /// Portamento when it is set, otherwise vibrato
    OnlyOne,
    /// Vibrato, followed by portamento when it is set
    BothTogether,
}

bitflags::bitflags! {
    /// Optional parts compiled into a replayer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Effects: u16 {
        /// Alternate between the note and the instrument's fixed note
        const SET_NOTE             = 1 << 0;
        /// Alternate the sample, adding the portamento value to the period
        const SET_FIXED_SAMPLE     = 1 << 1;
        /// Play the arpeggio table, 4 ticks per cycle
        const SET_ARPEGGIO         = 1 << 2;
        /// Use the secondary sample until the reset delay runs out
        const SET_SAMPLE           = 1 << 3;
        /// Arpeggio until the reset delay runs out
        const ARPEGGIO             = 1 << 4;
        /// Volume envelopes
        const ENVELOPE             = 1 << 5;
        /// Track volume is reset to maximum at the start of each track
        const RESET_VOLUME         = 1 << 6;
        /// Sample lengths and loops are stored in a table instead of in front of the data
        const SEPARATE_SAMPLE_INFO = 1 << 7;
    }
}

bitflags::bitflags! {
    /// Effects enabled on an instrument
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstrumentEffects: u8 {
        /// See [`Effects::SET_NOTE`]
        const SET_NOTE         = 0x02;
        /// See [`Effects::SET_FIXED_SAMPLE`]
        const SET_FIXED_SAMPLE = 0x04;
        /// See [`Effects::SET_ARPEGGIO`]
        const SET_ARPEGGIO     = 0x08;
        /// See [`Effects::SET_SAMPLE`]
        const SET_SAMPLE       = 0x10;
        /// See [`Effects::ARPEGGIO`]
        const ARPEGGIO         = 0x20;
    }
}

/// Everything detection learned about the replayer's behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Track bytecode dialect
    pub track: TrackDialect,
    /// Instrument record layout
    pub instruments: InstrumentLayout,
    /// Speed variation method
    pub speed_variation: SpeedVariation,
    /// Vibrato step calculation
    pub vibrato: VibratoTable,
    /// Portamento/vibrato interaction
    pub portamento_vibrato: PortamentoVibrato,
    /// Optional parts
    pub effects: Effects,
}

const fn sig2(a: u8, b: u8) -> [Option<u8>; 2] {
    [Some(a), Some(b)]
}

/// `SUBQ.W #1,d(a1)` .. `BEQ`, checking the speed variation counter
pub(crate) const SPEED_VARIATION: &Sig = &[Some(0x53), Some(0x69), None, None, Some(0x67)];

/// Classify the speed variation code at the cursor.
///
/// For the accumulator, the offset of the initial speed is also returned. It is addressed
/// through the global data block, not relative to the instruction.
pub(crate) fn speed_variation(
    sc: &Scanner,
    global: usize,
) -> Option<(SpeedVariation, Option<usize>)> {
    if sc.matches(6, &sig2(0x70, 0x03)) {
        Some((SpeedVariation::Table, None))
    } else if sc.matches(6, &sig2(0x7a, 0x00)) {
        if !sc.matches(12, &sig2(0xda, 0x29)) {
            return None;
        }
        let disp = sc.disp(sc.cursor() + 14)?;
        let offset = isize::try_from(global)
            .ok()?
            .checked_add(isize::from(disp))?;
        Some((SpeedVariation::Accumulator, Some(usize::try_from(offset).ok()?)))
    } else {
        None
    }
}

/// `MOVE.B d(a1,d3),d4`, the reset volume check follows it
pub(crate) const RESET_VOLUME: &Sig = &sig2(0x18, 0x31);

/// Whether a `BNE` follows the reset volume check at the cursor
pub(crate) fn reset_volume(sc: &Scanner) -> bool {
    sc.peek(4) == Some(0x66)
}

/// `MOVE.W d5,d(a0,d3)`, stores the track position
pub(crate) const STORE_POSITION: &Sig = &sig2(0x31, 0x85);

/// `CMP.B #$84,d5`, only present in the last dialect
const NOTE_FLAG_COMMAND: &Sig = &[Some(0x0c), Some(0x05), Some(0x00), Some(0x84)];

/// Classify the track parser at the cursor.
///
/// For the chained dialects, the cursor is moved to where the dialect was settled, which is
/// never past the next [`STORE_POSITION`].
pub(crate) fn track_dialect(sc: &mut Scanner) -> DetectResult<Option<TrackDialect>> {
    let dialect = if sc.matches(0, &sig2(0x08, 0x31)) {
        TrackDialect::V1
    } else if sc.matches(0, &sig2(0x4a, 0x34)) {
        TrackDialect::V2
    } else if sc.matches(0, &sig2(0x1a, 0x34)) {
        TrackDialect::V3
    } else if sc.matches(0, &sig2(0x42, 0x30)) {
        sc.seek(sc.cursor() + 2)?;
        return Ok(
            match sc.find_any([STORE_POSITION, NOTE_FLAG_COMMAND], 4) {
                Some(0) => Some(TrackDialect::V4),
                Some(_) => Some(TrackDialect::V5),
                None => None,
            },
        );
    } else {
        return Ok(None);
    };
    sc.seek(sc.cursor() + 2)?;
    Ok(Some(dialect))
}

/// `MOVE.x d(a5,d5.w),d(a1,d5.w)` instructions copying instrument fields, one per 6 bytes
const fn layout_sig<const N: usize>(fields: [(u8, u8, u8); N]) -> [[Option<u8>; 4]; N] {
    let mut out = [[None; 4]; N];
    let mut i = 0;
    while i < N {
        let (op, ea, field) = fields[i];
        out[i] = [Some(op), Some(ea), Some(0x50), Some(field)];
        i += 1;
    }
    out
}

const LAYOUT_V1: [[Option<u8>; 4]; 3] =
    layout_sig([(0x13, 0xb5, 0x02), (0x13, 0xb5, 0x07), (0x13, 0xb5, 0x0f)]);
const LAYOUT_V2: [[Option<u8>; 4]; 4] = layout_sig([
    (0x11, 0xb5, 0x01),
    (0x13, 0xb5, 0x02),
    (0x13, 0xb5, 0x07),
    (0x13, 0xb5, 0x0f),
]);
const LAYOUT_V3: [[Option<u8>; 4]; 7] = layout_sig([
    (0x11, 0xb5, 0x01),
    (0x13, 0xb5, 0x02),
    (0x13, 0xb5, 0x03),
    (0x31, 0xb5, 0x04),
    (0x33, 0x75, 0x06),
    (0x13, 0xb5, 0x08),
    (0x13, 0xb5, 0x0f),
]);

fn layout_matches(sc: &Scanner, layout: &[[Option<u8>; 4]]) -> bool {
    layout
        .iter()
        .enumerate()
        .all(|(i, sig)| sc.matches(i * 6, sig))
}

/// Classify the instrument setup code at the cursor
pub(crate) fn instrument_layout(sc: &Scanner) -> Option<InstrumentLayout> {
    if layout_matches(sc, &LAYOUT_V1) {
        Some(InstrumentLayout::V1)
    } else if layout_matches(sc, &LAYOUT_V2) {
        Some(InstrumentLayout::V2)
    } else if layout_matches(sc, &LAYOUT_V3) {
        Some(InstrumentLayout::V3)
    } else {
        None
    }
}

/// `MULU #6,d5` then `LEA d(PC),a2` at the cursor means a separate sample info table.
///
/// Returns the position of its displacement.
pub(crate) fn separate_sample_info(sc: &Scanner) -> Option<usize> {
    (sc.matches(12, &sig2(0xca, 0xfc)) && sc.matches(16, &sig2(0x45, 0xfa)))
        .then(|| sc.cursor() + 18)
}

/// Classify the portamento/vibrato dispatch at the cursor
pub(crate) fn portamento_vibrato(sc: &Scanner) -> Option<PortamentoVibrato> {
    if sc.matches(0, &sig2(0x7a, 0x00)) {
        Some(PortamentoVibrato::OnlyOne)
    } else if sc.matches(0, &sig2(0x53, 0x31)) {
        Some(PortamentoVibrato::BothTogether)
    } else {
        None
    }
}

/// Classify the vibrato setup at the cursor (a `SUB.W d(a0,d7),d5`)
pub(crate) fn vibrato_table(sc: &Scanner) -> Option<VibratoTable> {
    if sc.matches(4, &sig2(0x53, 0x31)) {
        Some(VibratoTable::Halving)
    } else if sc.matches(8, &sig2(0x8a, 0xf1)) {
        Some(VibratoTable::Division)
    } else {
        None
    }
}

/// `BTST #n,d(a1,d3)` .. `BEQ.S`, skipping an effect when its instrument flag is clear
const EFFECT_TEST: &Sig = &[
    Some(0x08),
    Some(0x31),
    None,
    None,
    None,
    None,
    Some(0x67),
];

/// Walk the chain of effect blocks starting at the cursor.
///
/// Each block tests one instrument flag and branches over its body. The bit number tells
/// which effect the block implements. On success, the cursor is left after the last block.
pub(crate) fn effect_chain(sc: &mut Scanner) -> DetectResult<Option<Effects>> {
    if sc.find(EFFECT_TEST, 8).is_none() {
        return Ok(None);
    }
    let mut effects = Effects::empty();
    loop {
        effects |= match sc.peek(3) {
            Some(1) => Effects::SET_NOTE,
            Some(2) => Effects::SET_FIXED_SAMPLE,
            Some(3) => Effects::SET_ARPEGGIO,
            Some(4) => Effects::SET_SAMPLE,
            Some(5) => Effects::ARPEGGIO,
            _ => Effects::empty(),
        };
        let Some(branch) = sc.peek(7) else {
            return Ok(None);
        };
        #[expect(clippy::cast_possible_wrap)]
        let step = i16::from(branch as i8) + 8;
        // A chain that doesn't move forward never ends
        let Ok(step @ 1..) = usize::try_from(step) else {
            return Ok(None);
        };
        if sc.advance(step, 0)?.is_none() {
            return Ok(None);
        }
        if !sc.matches(0, EFFECT_TEST) {
            return Ok(Some(effects));
        }
    }
}

/// Check for the envelope handler following the effect chain.
///
/// Returns `Some(false)` if there is none, `Some(true)` if there is one, with the cursor
/// moved past its test.
pub(crate) fn has_envelope(sc: &mut Scanner) -> DetectResult<Option<bool>> {
    if sc.advance(0, 8)?.is_none() {
        return Ok(None);
    }
    if sc.peek(4) == Some(0x6b) && sc.matches(6, &sig2(0x4a, 0x31)) {
        sc.seek(sc.cursor() + 8)?;
        Ok(Some(true))
    } else {
        Ok(Some(false))
    }
}

/// Find the envelope table load, `LSL.W #4,d4` .. `LEA d(PC),a2`, returning the position of
/// its displacement.
pub(crate) fn envelope_table(sc: &mut Scanner) -> Option<usize> {
    const fn load(size: u8) -> [Option<u8>; 8] {
        [
            Some(0xe9),
            Some(0x44),
            Some(size),
            Some(0x84),
            None,
            None,
            Some(0x45),
            Some(0xfa),
        ]
    }
    sc.find_any([&load(0x31), &load(0x11)], 10)?;
    Some(sc.cursor() + 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded(bytes: &[u8]) -> Vec<u8> {
        let mut v = bytes.to_vec();
        v.resize(64, 0x4e);
        v
    }

    #[test]
    fn speed_variation_kinds() {
        let buf = padded(&[0x53, 0x69, 0, 2, 0x67, 0, 0x70, 0x03]);
        let sc = Scanner::new(&buf, 0);
        assert_eq!(
            speed_variation(&sc, 0x100),
            Some((SpeedVariation::Table, None))
        );
        let buf = padded(&[
            0x53, 0x69, 0, 2, 0x67, 0, 0x7a, 0x00, 0, 0, 0, 0, 0xda, 0x29, 0xff, 0xf0,
        ]);
        let sc = Scanner::new(&buf, 0);
        assert_eq!(
            speed_variation(&sc, 0x100),
            Some((SpeedVariation::Accumulator, Some(0xf0)))
        );
        // Accumulator without the add is not a known replayer
        let buf = padded(&[0x53, 0x69, 0, 2, 0x67, 0, 0x7a, 0x00]);
        let sc = Scanner::new(&buf, 0);
        assert_eq!(speed_variation(&sc, 0x100), None);
    }

    #[test]
    fn chained_dialect_upgrade() {
        let buf = padded(&[0x42, 0x30, 0x4e, 0x71, 0x0c, 0x05, 0x00, 0x84, 0x31, 0x85]);
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(track_dialect(&mut sc), Ok(Some(TrackDialect::V5)));
        assert_eq!(sc.cursor(), 4);
        let buf = padded(&[0x42, 0x30, 0x4e, 0x71, 0x31, 0x85, 0x0c, 0x05, 0x00, 0x84]);
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(track_dialect(&mut sc), Ok(Some(TrackDialect::V4)));
        assert_eq!(sc.cursor(), 4);
        let buf = padded(&[0x1a, 0x34]);
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(track_dialect(&mut sc), Ok(Some(TrackDialect::V3)));
        assert_eq!(sc.cursor(), 2);
    }

    #[test]
    fn instrument_layouts() {
        let mut code = Vec::new();
        for sig in LAYOUT_V3 {
            code.extend(sig.iter().map(|b| b.unwrap_or(0)));
            code.extend([0, 0]);
        }
        let buf = padded(&code);
        assert_eq!(
            instrument_layout(&Scanner::new(&buf, 0)),
            Some(InstrumentLayout::V3)
        );
        assert_eq!(instrument_layout(&Scanner::new(&buf, 6)), None);
    }

    #[test]
    fn effect_chain_walk() {
        let buf = padded(&[
            // SET_NOTE, body of 2 bytes
            0x08, 0x31, 0x00, 0x01, 0x00, 0x00, 0x67, 0x02, 0x4e, 0x71,
            // ARPEGGIO, no body
            0x08, 0x31, 0x00, 0x05, 0x00, 0x00, 0x67, 0x00,
            // Envelope test
            0x4e, 0x71, 0x4e, 0x71, 0x6b, 0x00, 0x4a, 0x31,
        ]);
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(
            effect_chain(&mut sc),
            Ok(Some(Effects::SET_NOTE | Effects::ARPEGGIO))
        );
        assert_eq!(sc.cursor(), 18);
        assert_eq!(has_envelope(&mut sc), Ok(Some(true)));
        assert_eq!(sc.cursor(), 26);
    }

    #[test]
    fn effect_chain_must_advance() {
        let buf = padded(&[0x08, 0x31, 0x00, 0x01, 0x00, 0x00, 0x67, 0xf8]);
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(effect_chain(&mut sc), Ok(None));
    }
}
