//! The output side of the replayer.
//!
//! The replayer doesn't produce audio. It drives four [`VirtualChannel`]s the way the 68000
//! replayer drives the Amiga's audio hardware, and leaves mixing to the host.

/// One Amiga audio channel, as seen by the replayer
pub trait VirtualChannel {
    /// Set the playback period (Amiga clock ticks per sample)
    fn set_period(&mut self, period: u32);
    /// Set the volume, 0 to 64
    fn set_volume(&mut self, volume: u16);
    /// Start playing `length` bytes of `data`, from `start`.
    ///
    /// `index` is the sample number.
    fn play_sample(&mut self, index: u8, data: &[i8], start: u32, length: u32);
    /// Loop the current sample once it finishes. Both values are in bytes.
    fn set_loop(&mut self, start: u32, length: u32);
    /// Stop playing
    fn mute(&mut self);
    /// Whether a sample is playing
    fn is_active(&self) -> bool;
}

/// A channel that only remembers whether it is active.
///
/// Useful when only the replayer state matters, like for duration calculation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChannel {
    active: bool,
}

impl VirtualChannel for NullChannel {
    fn set_period(&mut self, _period: u32) {}
    fn set_volume(&mut self, _volume: u16) {}
    fn play_sample(&mut self, _index: u8, _data: &[i8], _start: u32, _length: u32) {
        self.active = true;
    }
    fn set_loop(&mut self, _start: u32, _length: u32) {}
    fn mute(&mut self) {
        self.active = false;
    }
    fn is_active(&self) -> bool {
        self.active
    }
}

/// A command received by a [`RecordingChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    /// [`VirtualChannel::set_period`]
    SetPeriod(u32),
    /// [`VirtualChannel::set_volume`]
    SetVolume(u16),
    /// [`VirtualChannel::play_sample`]
    PlaySample {
        /// Sample number
        index: u8,
        /// Start offset
        start: u32,
        /// Length in bytes
        length: u32,
    },
    /// [`VirtualChannel::set_loop`]
    SetLoop {
        /// Loop start
        start: u32,
        /// Loop length in bytes
        length: u32,
    },
    /// [`VirtualChannel::mute`]
    Mute,
}

/// A channel that records every command it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    /// Received commands, oldest first
    pub commands: Vec<ChannelCommand>,
    active: bool,
}

impl RecordingChannel {
    /// The period and volume most recently set, if any
    #[must_use]
    pub fn last_output(&self) -> (Option<u32>, Option<u16>) {
        let mut period = None;
        let mut volume = None;
        for cmd in self.commands.iter().rev() {
            match *cmd {
                ChannelCommand::SetPeriod(p) if period.is_none() => period = Some(p),
                ChannelCommand::SetVolume(v) if volume.is_none() => volume = Some(v),
                _ => {}
            }
            if period.is_some() && volume.is_some() {
                break;
            }
        }
        (period, volume)
    }
    /// Take the recorded commands, leaving the record empty
    pub fn take(&mut self) -> Vec<ChannelCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl VirtualChannel for RecordingChannel {
    fn set_period(&mut self, period: u32) {
        self.commands.push(ChannelCommand::SetPeriod(period));
    }
    fn set_volume(&mut self, volume: u16) {
        self.commands.push(ChannelCommand::SetVolume(volume));
    }
    fn play_sample(&mut self, index: u8, _data: &[i8], start: u32, length: u32) {
        self.active = true;
        self.commands.push(ChannelCommand::PlaySample {
            index,
            start,
            length,
        });
    }
    fn set_loop(&mut self, start: u32, length: u32) {
        self.commands.push(ChannelCommand::SetLoop { start, length });
    }
    fn mute(&mut self) {
        self.active = false;
        self.commands.push(ChannelCommand::Mute);
    }
    fn is_active(&self) -> bool {
        self.active
    }
}

#[test]
fn test_recording_last_output() {
    let mut ch = RecordingChannel::default();
    assert_eq!(ch.last_output(), (None, None));
    ch.set_period(428);
    ch.set_volume(64);
    ch.play_sample(1, &[], 0, 16);
    ch.set_period(214);
    assert!(ch.is_active());
    assert_eq!(ch.last_output(), (Some(214), Some(64)));
    ch.mute();
    assert!(!ch.is_active());
    assert_eq!(ch.take().len(), 5);
    assert!(ch.commands.is_empty());
}
