//! Signature scanning over the replayer code embedded in a module.
//!
//! Modules of this family have no header. Instead, the replayer's 68000 code is stored in front
//! of the music data, and the data tables are found by locating the instructions that address
//! them. Almost all of them use the PC-relative `LEA d16(PC),An` form, where the 16 bit
//! displacement is relative to the address of the displacement word itself.

use crate::result::{DetectError, DetectResult};

/// Size of the prefix of a module that is searched for the replayer code
pub const SCAN_WINDOW: usize = 4096;

/// Files smaller than this are never recognized
pub const MIN_MODULE_SIZE: usize = 1024;

/// The code prologue is only searched for within this many bytes from the start
const START_SEARCH_LIMIT: usize = 0x400;

/// A code signature. `None` matches any byte.
pub type Sig = [Option<u8>];

/// `MOVEM.L d0-d5/a0-a6,-(sp)`, the first instruction of the replayer routines
const PROLOGUE: &Sig = &[Some(0x48), Some(0xe7), Some(0xfc), Some(0xfe)];

/// `RTS`
pub const RTS: &Sig = &[Some(0x4e), Some(0x75)];

/// Forward-only cursor over a scan window.
///
/// Searches advance in steps of 2 bytes, the size of a 68000 instruction word.
pub struct Scanner<'a> {
    buf: &'a [u8],
    cur: usize,
}

impl<'a> Scanner<'a> {
    /// Create a scanner with the cursor at `cur`
    pub const fn new(buf: &'a [u8], cur: usize) -> Self {
        Self { buf, cur }
    }
    /// The current position of the cursor
    pub const fn cursor(&self) -> usize {
        self.cur
    }
    /// Get the byte at `at`, if it is inside the window
    pub fn byte(&self, at: usize) -> Option<u8> {
        self.buf.get(at).copied()
    }
    /// Get the byte at `offset` bytes after the cursor
    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.byte(self.cur + offset)
    }
    /// Whether `sig` matches at `at`
    pub fn matches_at(&self, at: usize, sig: &Sig) -> bool {
        let Some(window) = self.buf.get(at..at + sig.len()) else {
            return false;
        };
        window
            .iter()
            .zip(sig)
            .all(|(byte, expected)| expected.is_none_or(|e| e == *byte))
    }
    /// Whether `sig` matches at `offset` bytes after the cursor
    pub fn matches(&self, offset: usize, sig: &Sig) -> bool {
        self.matches_at(self.cur + offset, sig)
    }
    /// Last position (exclusive) a search with the given guard may examine
    const fn limit(&self, guard: usize) -> usize {
        self.buf.len().saturating_sub(guard)
    }
    /// Search forward from the cursor for `sig`, staying `guard` bytes clear of the end.
    ///
    /// On success, the cursor is moved to the match.
    pub fn find(&mut self, sig: &Sig, guard: usize) -> Option<usize> {
        let limit = self.limit(guard);
        let pos = (self.cur..limit)
            .step_by(2)
            .find(|&i| self.matches_at(i, sig))?;
        log::trace!("Signature {:02x?} at {pos:#x}", sig.first());
        self.cur = pos;
        Some(pos)
    }
    /// Like [`find`](Self::find), but gives up if `stop` is encountered first
    pub fn find_with_stop(&mut self, sig: &Sig, stop: &Sig, guard: usize) -> Option<usize> {
        let limit = self.limit(guard);
        for i in (self.cur..limit).step_by(2) {
            if self.matches_at(i, stop) {
                return None;
            }
            if self.matches_at(i, sig) {
                self.cur = i;
                return Some(i);
            }
        }
        None
    }
    /// Search forward for whichever of `sigs` comes first, checked in the given order at each
    /// position. Returns the index of the signature that matched.
    pub fn find_any<const N: usize>(&mut self, sigs: [&Sig; N], guard: usize) -> Option<usize> {
        let limit = self.limit(guard);
        for i in (self.cur..limit).step_by(2) {
            if let Some(which) = sigs.iter().position(|sig| self.matches_at(i, sig)) {
                self.cur = i;
                return Some(which);
            }
        }
        None
    }
    /// Move the cursor forward by `amount`, making sure at least `guard` bytes remain after it.
    pub fn advance(&mut self, amount: usize, guard: usize) -> DetectResult<Option<()>> {
        self.seek(self.cur + amount)?;
        Ok((self.cur < self.limit(guard)).then_some(()))
    }
    /// Move the cursor to `pos`, which must not be behind it
    pub const fn seek(&mut self, pos: usize) -> DetectResult<()> {
        if pos < self.cur {
            return Err(DetectError::Backtrack {
                from: self.cur,
                to: pos,
            });
        }
        self.cur = pos;
        Ok(())
    }
    /// Resolve the 16 bit PC-relative displacement stored at `at`.
    ///
    /// The result is the absolute offset `at + disp`, which can be anywhere in the file.
    /// It is rejected if it would be negative.
    pub fn rel_offset(&self, at: usize) -> Option<usize> {
        let disp = self.disp(at)?;
        let anchor = i32::try_from(at).ok()?;
        usize::try_from(anchor.wrapping_add(i32::from(disp))).ok()
    }
    /// Read the raw signed 16 bit displacement stored at `at`
    pub fn disp(&self, at: usize) -> Option<i16> {
        let hi = self.byte(at)?;
        let lo = self.byte(at + 1)?;
        Some(i16::from_be_bytes([hi, lo]))
    }
    /// Search backwards from `from` (inclusive) for every signature in `sigs`, without
    /// touching the cursor.
    ///
    /// Stops as soon as every signature was seen at least once. A signature that is seen
    /// again before that point replaces its earlier hit.
    pub fn look_behind<const N: usize>(
        &self,
        from: usize,
        sigs: [&Sig; N],
    ) -> Option<[usize; N]> {
        let mut found = [None; N];
        let mut pos = from;
        loop {
            for (slot, sig) in found.iter_mut().zip(sigs) {
                if self.matches_at(pos, sig) {
                    *slot = Some(pos);
                }
            }
            if found.iter().all(Option::is_some) {
                return Some(found.map(|p| p.unwrap_or_default()));
            }
            pos = pos.checked_sub(2)?;
        }
    }
}

/// Find the replayer code prologue. Unlike other searches, this one is not word aligned.
pub fn find_start(buf: &[u8]) -> Option<usize> {
    let sc = Scanner::new(buf, 0);
    (0..START_SEARCH_LIMIT).find(|&i| sc.matches_at(i, PROLOGUE))
}

/// Copy the scan window out of the module bytes, zero padding short files.
#[must_use]
pub fn scan_window(data: &[u8]) -> [u8; SCAN_WINDOW] {
    let mut window = [0; SCAN_WINDOW];
    let len = data.len().min(SCAN_WINDOW);
    window[..len].copy_from_slice(&data[..len]);
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_word_aligned() {
        let buf = [0x00, 0x4e, 0x75, 0x00, 0x4e, 0x75];
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(sc.find(RTS, 0), Some(4));
        assert_eq!(sc.cursor(), 4);
    }

    #[test]
    fn find_respects_guard() {
        let buf = [0x00, 0x00, 0x4e, 0x75];
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(sc.find(RTS, 2), None);
        assert_eq!(sc.cursor(), 0);
        assert_eq!(sc.find(RTS, 1), Some(2));
    }

    #[test]
    fn find_with_stop_stops() {
        let buf = [0x4e, 0x75, 0x61, 0x00];
        let mut sc = Scanner::new(&buf, 0);
        assert_eq!(sc.find_with_stop(&[Some(0x61), Some(0x00)], RTS, 0), None);
    }

    #[test]
    fn wildcards_match_anything() {
        let buf = [0x2c, 0x7c, 0x12, 0x34];
        let sc = Scanner::new(&buf, 0);
        assert!(sc.matches_at(0, &[Some(0x2c), None, Some(0x12)]));
        assert!(!sc.matches_at(0, &[Some(0x2c), None, Some(0x13)]));
        assert!(!sc.matches_at(2, &[Some(0x12), None, None]));
    }

    #[test]
    fn relative_offsets() {
        // Displacement of -2 stored at 4 points at 2
        let buf = [0, 0, 0, 0, 0xff, 0xfe, 0x00, 0x10];
        let sc = Scanner::new(&buf, 0);
        assert_eq!(sc.rel_offset(4), Some(2));
        assert_eq!(sc.rel_offset(6), Some(0x16));
        // Would land before the start of the file
        let buf = [0x80, 0x00];
        let sc = Scanner::new(&buf, 0);
        assert_eq!(sc.rel_offset(0), None);
    }

    #[test]
    fn look_behind_finds_both() {
        let buf = [0x4b, 0xfa, 0x00, 0x00, 0x43, 0xfa, 0x00, 0x00, 0x00, 0x00];
        let sc = Scanner::new(&buf, 8);
        let found = sc.look_behind(8, [&[Some(0x4b), Some(0xfa)], &[Some(0x43), Some(0xfa)]]);
        assert_eq!(found, Some([0, 4]));
        assert_eq!(sc.look_behind(2, [&[Some(0x43), Some(0xfa)]]), None);
    }

    #[test]
    fn look_behind_keeps_furthest_repeat() {
        let buf = [0x43, 0xfa, 0x4b, 0xfa, 0x4b, 0xfa, 0x00, 0x00];
        let sc = Scanner::new(&buf, 0);
        let found = sc.look_behind(6, [&[Some(0x4b), Some(0xfa)], &[Some(0x43), Some(0xfa)]]);
        assert_eq!(found, Some([2, 0]));
    }

    #[test]
    fn find_any_reports_which() {
        let buf = [0x00, 0x00, 0x0c, 0x05, 0x00, 0x84, 0x31, 0x85];
        let mut sc = Scanner::new(&buf, 0);
        let which = sc.find_any([&[Some(0x31), Some(0x85)], &[Some(0x0c), Some(0x05)]], 0);
        assert_eq!(which, Some(1));
        assert_eq!(sc.cursor(), 2);
    }

    #[test]
    fn seek_never_backtracks() {
        let buf = [0; 8];
        let mut sc = Scanner::new(&buf, 4);
        assert!(sc.seek(2).is_err());
        assert!(sc.seek(6).is_ok());
        assert_eq!(sc.advance(2, 0), Ok(None));
    }

    #[test]
    fn start_is_found_unaligned() {
        let mut buf = [0u8; 32];
        buf[3..7].copy_from_slice(&[0x48, 0xe7, 0xfc, 0xfe]);
        assert_eq!(find_start(&buf), Some(3));
        assert_eq!(find_start(&[0; 16]), None);
    }
}
