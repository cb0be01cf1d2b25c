//! Lookup tables used by the replayer

/// Number of notes in [`PERIODS`]
pub const NUM_NOTES: usize = 120;

/// Clock of the Paula chip on a PAL Amiga
pub const PAL_CLOCK: u32 = 3_546_895;

const OCTAVE: [u16; 12] = [856, 808, 762, 720, 678, 640, 604, 570, 538, 508, 480, 453];

const fn octaves_down<const N: usize>(rows: [u16; N]) -> [u16; NUM_NOTES] {
    let mut out = [0; NUM_NOTES];
    let mut i = 0;
    while i < 48 {
        out[i] = OCTAVE[i % 12] << (3 - i / 12);
        i += 1;
    }
    while i < 48 + N {
        out[i] = rows[i - 48];
        i += 1;
    }
    out
}

/// Amiga periods for each note. Note 48 is the standard C-1.
///
/// Notes 0 to 47 are the ProTracker octave shifted left, not values read from a replayer.
pub static PERIODS: [u16; NUM_NOTES] = octaves_down([
    428, 404, 381, 360, 339, 320, 302, 285, 269, 254, 240, 226, //
    214, 202, 190, 180, 170, 160, 151, 143, 135, 127, 120, 113, //
    107, 101, 95, 90, 85, 80, 76, 71, 67, 64, 60, 57, //
    53, 50, 47, 45, 42, 40, 37, 35, 33, 31, 30, 28, //
    27, 25, 24, 22, 21, 20, 19, 18, 17, 16, 15, 14, //
    13, 13, 12, 11, 11, 10, 9, 9, 8, 8, 7, 7,
]);

/// Playback frequency in Hz for each note of [`PERIODS`]
#[expect(clippy::cast_lossless)]
pub static NOTE_FREQUENCIES: [u32; NUM_NOTES] = {
    let mut out = [0; NUM_NOTES];
    let mut i = 0;
    while i < NUM_NOTES {
        out[i] = PAL_CLOCK / PERIODS[i] as u32;
        i += 1;
    }
    out
};

/// Look up the period of `note + transpose`, clamped to the table
#[must_use]
pub fn period(note: u8, transpose: i8) -> u16 {
    let index = usize::try_from(i16::from(note) + i16::from(transpose)).unwrap_or(0);
    PERIODS[index.min(NUM_NOTES - 1)]
}

// The vibrato tables below are reconstructed, not checked against a replayer dump.
// Traces of instruments with a vibrato number other than 0 can't be trusted until they are.

/// Vibrato swing length in ticks, per vibrato number. Number 0 disables vibrato.
pub static VIBRATO_COUNTERS: [u8; 16] = [0, 2, 3, 4, 5, 6, 8, 10, 2, 3, 4, 5, 6, 8, 10, 12];

/// Vibrato depth for [`VibratoTable::Halving`](crate::VibratoTable::Halving):
/// how many times the step to the next note is halved
pub static VIBRATO_DEPTHS_HALVING: [i8; 16] = [0, 3, 3, 3, 2, 2, 2, 1, 4, 4, 3, 3, 2, 2, 1, 1];

/// Vibrato depth for [`VibratoTable::Division`](crate::VibratoTable::Division):
/// what the step to the next note is divided by
pub static VIBRATO_DEPTHS_DIVISION: [i8; 16] = [1, 8, 8, 6, 6, 4, 4, 2, 16, 12, 8, 6, 4, 3, 2, 1];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periods() {
        assert_eq!(PERIODS[0], 6848);
        assert_eq!(PERIODS[36], 856);
        assert_eq!(PERIODS[48], 428);
        assert_eq!(PERIODS[NUM_NOTES - 1], 7);
        assert!(PERIODS.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn period_lookup_clamps() {
        assert_eq!(period(48, 0), 428);
        assert_eq!(period(48, 12), 214);
        assert_eq!(period(0, -5), PERIODS[0]);
        assert_eq!(period(250, 0), PERIODS[NUM_NOTES - 1]);
        assert_eq!(period(119, 127), 7);
    }

    #[test]
    fn frequencies() {
        assert_eq!(NOTE_FREQUENCIES[48], 3_546_895 / 428);
    }
}
