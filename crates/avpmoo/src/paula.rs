//! Minimal software Paula, enough to listen to a module

use avpro::{VirtualChannel, tables::PAL_CLOCK};

/// Fractional bits of the sample cursor
const FRAC_BITS: u32 = 16;

#[derive(Default)]
pub struct PaulaChannel {
    data: Vec<i8>,
    /// Fixed point position inside `data`
    pos: u64,
    end: u64,
    next_loop: Option<(u64, u64)>,
    period: u32,
    volume: u16,
    active: bool,
}

impl PaulaChannel {
    pub const fn period(&self) -> u32 {
        self.period
    }
    pub const fn volume(&self) -> u16 {
        self.volume
    }
    /// Produce one output sample at `rate` Hz, scaled to the 14 bit range
    pub fn next(&mut self, rate: u32) -> i32 {
        if !self.active || self.period == 0 || rate == 0 {
            return 0;
        }
        let idx = usize::try_from(self.pos >> FRAC_BITS).unwrap_or(usize::MAX);
        let Some(&sample) = self.data.get(idx) else {
            self.active = false;
            return 0;
        };
        let step = (u64::from(PAL_CLOCK) << FRAC_BITS) / (u64::from(self.period) * u64::from(rate));
        self.pos += step;
        if self.pos >= self.end {
            match self.next_loop {
                Some((start, end)) => {
                    self.pos = start + (self.pos - self.end);
                    self.end = end;
                }
                None => self.active = false,
            }
        }
        i32::from(sample) * i32::from(self.volume.min(64))
    }
}

impl VirtualChannel for PaulaChannel {
    fn set_period(&mut self, period: u32) {
        self.period = period;
    }
    fn set_volume(&mut self, volume: u16) {
        self.volume = volume;
    }
    fn play_sample(&mut self, _index: u8, data: &[i8], start: u32, length: u32) {
        data.clone_into(&mut self.data);
        let end = (u64::from(start) + u64::from(length)).min(data.len() as u64);
        self.pos = u64::from(start) << FRAC_BITS;
        self.end = end << FRAC_BITS;
        self.next_loop = None;
        self.active = length > 0;
    }
    fn set_loop(&mut self, start: u32, length: u32) {
        let start = u64::from(start).min(self.data.len() as u64);
        let end = (start + u64::from(length)).min(self.data.len() as u64);
        self.next_loop = (end > start).then_some((start << FRAC_BITS, end << FRAC_BITS));
    }
    fn mute(&mut self) {
        self.active = false;
    }
    fn is_active(&self) -> bool {
        self.active
    }
}

/// Mix the four channels into interleaved stereo, with the Amiga's hard panning
pub fn mix(channels: &mut [PaulaChannel; 4], rate: u32, out: &mut [i16]) {
    for frame in out.chunks_exact_mut(2) {
        let [a, b, c, d] = channels.each_mut().map(|ch| ch.next(rate));
        frame[0] = clip(a + d);
        frame[1] = clip(b + c);
    }
}

fn clip(v: i32) -> i16 {
    i16::try_from((v * 4).clamp(i32::from(i16::MIN), i32::from(i16::MAX))).unwrap_or_default()
}
