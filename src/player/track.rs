//! Position list and track bytecode interpretation

use {
    super::{GlobalState, Player, voice::VoiceState},
    crate::{
        NUM_VOICES,
        channel::VirtualChannel,
        features::{Effects, TrackDialect},
        module::Module,
        result::{PlayResult, PlaybackError},
        tables::period,
    },
    std::sync::Arc,
};

/// Cursor over the bytecode of one track
pub(super) struct Row<'a> {
    track: &'a [u8],
    pos: usize,
}

impl Row<'_> {
    fn peek(&self) -> PlayResult<u8> {
        self.track
            .get(self.pos)
            .copied()
            .ok_or(PlaybackError::Inconsistency("track ran past its end"))
    }
    fn next(&mut self) -> PlayResult<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }
}

/// Parse the commands and note of one track row, starting at its first byte.
///
/// Returns the instrument the row selects.
pub(super) type RowParser =
    fn(&mut Row, u8, &mut VoiceState, &mut GlobalState) -> PlayResult<Option<u8>>;

impl TrackDialect {
    /// The row parser for this dialect
    pub(super) fn parser(self) -> RowParser {
        match self {
            Self::V1 => row_v1,
            Self::V2 => row_v2,
            Self::V3 => row_v3,
            Self::V4 => row_v4,
            Self::V5 => row_v5,
        }
    }
}

/// Instrument arguments with bit 7 set don't select anything
fn selectable(arg: u8) -> Option<u8> {
    (arg & 0x80 == 0).then_some(arg)
}

fn note_and_flag(row: &mut Row, voice: &mut VoiceState) -> PlayResult {
    voice.note_and_flag = row.next()?;
    voice.note = voice.note_and_flag & 0x7f;
    Ok(())
}

fn row_v1(
    row: &mut Row,
    first: u8,
    voice: &mut VoiceState,
    _global: &mut GlobalState,
) -> PlayResult<Option<u8>> {
    voice.speed_counter = first & 0x3f;
    if first & 0x40 != 0 {
        voice.envelope_wait = 1;
        voice.envelope_loop_count = 1;
        voice.envelope_position = 3;
    }
    let mut instrument = None;
    if first & 0x80 != 0 {
        let arg = row.next()?;
        if arg & 0x80 == 0 {
            instrument = Some(arg);
        } else {
            voice.portamento = arg;
        }
    }
    note_and_flag(row, voice)?;
    Ok(instrument)
}

fn row_v2(
    row: &mut Row,
    first: u8,
    voice: &mut VoiceState,
    _global: &mut GlobalState,
) -> PlayResult<Option<u8>> {
    let mut instrument = None;
    let mut speed = first;
    if first & 0x80 != 0 {
        instrument = Some(first & 0x7f);
        let arg = row.next()?;
        if arg & 0x80 == 0 {
            voice.track_volume = arg;
        } else {
            voice.portamento = arg;
        }
        speed = row.next()?;
    }
    voice.speed_counter = speed;
    note_and_flag(row, voice)?;
    Ok(instrument)
}

fn row_v3(
    row: &mut Row,
    first: u8,
    voice: &mut VoiceState,
    _global: &mut GlobalState,
) -> PlayResult<Option<u8>> {
    let mut instrument = None;
    let mut byte = first;
    while byte & 0x80 != 0 {
        let arg = row.next()?;
        match byte {
            0x80 => instrument = selectable(arg),
            0x81 => voice.track_volume = arg,
            0x82 => voice.portamento = arg,
            0x8a => voice.max_speed_counter = arg,
            0x8e => voice.track_volume = voice.track_volume.wrapping_add(arg),
            _ => {}
        }
        byte = row.next()?;
    }
    voice.speed_counter = byte;
    note_and_flag(row, voice)?;
    Ok(instrument)
}

/// Command numbers of the chained dialects
struct Chained {
    instrument: u8,
    mute: u8,
    portamento: u8,
    accumulator_speed: u8,
    keep_note: u8,
    max_speed: u8,
    global_transpose: Option<u8>,
    track_volume: u8,
    add_track_volume: u8,
}

const CHAINED_V4: Chained = Chained {
    instrument: 0x80,
    mute: 0x81,
    portamento: 0x82,
    accumulator_speed: 0x83,
    keep_note: 0x87,
    max_speed: 0x8a,
    global_transpose: None,
    track_volume: 0x8c,
    add_track_volume: 0x8d,
};

const CHAINED_V5: Chained = Chained {
    instrument: 0x80,
    mute: 0x81,
    portamento: 0x82,
    accumulator_speed: 0x83,
    keep_note: 0x84,
    max_speed: 0x85,
    global_transpose: Some(0x86),
    track_volume: 0x87,
    add_track_volume: 0x8b,
};

fn row_v4(
    row: &mut Row,
    first: u8,
    voice: &mut VoiceState,
    global: &mut GlobalState,
) -> PlayResult<Option<u8>> {
    row_chained(row, first, voice, global, &CHAINED_V4)
}

fn row_v5(
    row: &mut Row,
    first: u8,
    voice: &mut VoiceState,
    global: &mut GlobalState,
) -> PlayResult<Option<u8>> {
    row_chained(row, first, voice, global, &CHAINED_V5)
}

/// Commands, then either a note or a mute, then the speed
fn row_chained(
    row: &mut Row,
    first: u8,
    voice: &mut VoiceState,
    global: &mut GlobalState,
    cmds: &Chained,
) -> PlayResult<Option<u8>> {
    let mut instrument = None;
    let mut byte = first;
    loop {
        if byte & 0x80 == 0 {
            voice.note = byte;
            break;
        }
        if byte == cmds.mute {
            voice.mute = true;
            voice.note = 64;
            voice.transpose = 0;
            break;
        }
        let arg = row.next()?;
        match byte {
            b if b == cmds.instrument => instrument = selectable(arg),
            b if b == cmds.portamento => voice.portamento = arg,
            b if b == cmds.accumulator_speed => global.speed_variation2_speed = arg,
            b if b == cmds.keep_note => voice.note_and_flag = 0xff,
            b if b == cmds.max_speed => voice.max_speed_counter = arg,
            b if Some(b) == cmds.global_transpose => global.global_transpose = arg.cast_signed(),
            b if b == cmds.track_volume => voice.track_volume = arg,
            b if b == cmds.add_track_volume => {
                voice.track_volume = voice.track_volume.wrapping_add(arg);
            }
            _ => {}
        }
        byte = row.next()?;
    }
    voice.speed_counter = row.next()?;
    voice.speed_counter2 = 0;
    Ok(instrument)
}

/// Load the selected instrument into the voice and start its sample
fn start_note<C: VirtualChannel>(
    module: &Module,
    voice: &mut VoiceState,
    channel: &mut C,
) -> PlayResult {
    let number = voice
        .instrument_number
        .ok_or(PlaybackError::Inconsistency("note played without an instrument"))?;
    let instr = module
        .instruments
        .get(usize::from(number))
        .ok_or(PlaybackError::Inconsistency("instrument out of range"))?;
    voice.instrument = Some(number);
    voice.effects = instr.effects;
    voice.stop_reset_delay = instr.stop_reset_delay;
    voice.vibrato_delay = instr.vibrato_delay;
    voice.transpose = instr.transpose;
    voice.fine_tune = instr.fine_tune;
    voice.sample = instr.sample;
    if !module.features().effects.contains(Effects::ENVELOPE) {
        voice.volume = u16::from(instr.volume);
    }
    let sample = module
        .samples
        .get(usize::from(instr.sample))
        .ok_or(PlaybackError::Inconsistency("sample out of range"))?;
    channel.set_period(126);
    channel.play_sample(
        instr.sample,
        &sample.data,
        u32::from(instr.sample_start_offset),
        u32::from(sample.length) * 2,
    );
    if sample.loop_length > 1 {
        channel.set_loop(
            u32::from(sample.loop_start),
            u32::from(sample.loop_length) * 2,
        );
    }
    Ok(())
}

impl Player {
    /// Move a voice to the next entry of its position list
    pub(super) fn parse_next_position(&mut self, idx: usize, notify: bool) -> PlayResult {
        let module = Arc::clone(&self.module);
        let list = &module.sub_songs[self.sub_song].position_lists[idx];
        let at = |pos: i8| {
            usize::try_from(pos)
                .ok()
                .and_then(|pos| list.get(pos))
                .copied()
                .ok_or(PlaybackError::Inconsistency("position list ran past its end"))
        };
        let chained = module.features().track == TrackDialect::V5;
        let voice = &mut self.voices[idx];
        let mut pos = voice.position;
        loop {
            pos = pos.wrapping_add(1);
            let entry = at(pos)?;
            if entry >= 0xfe {
                voice.track_number = entry;
                pos = at(pos.wrapping_add(1))?.wrapping_sub(1).cast_signed();
                break;
            }
            if entry == 0xfd {
                pos = pos.wrapping_add(1);
                self.global.master_volume_fade_speed = at(pos)?.cast_signed();
                continue;
            }
            if entry & 0x40 != 0 {
                if voice.loop_enabled {
                    voice.loop_count = voice.loop_count.wrapping_sub(1);
                    if voice.loop_count == 0 {
                        voice.loop_enabled = false;
                        continue;
                    }
                    pos = voice.loop_start;
                } else {
                    voice.loop_enabled = true;
                    voice.loop_count = entry & 0x3f;
                    pos = pos.wrapping_add(1);
                    voice.loop_start = pos;
                }
            }
            voice.loop_track_counter = at(pos)?;
            pos = pos.wrapping_add(1);
            voice.track_number = at(pos)?;
            if chained {
                voice.max_speed_counter = 255;
            }
            break;
        }
        voice.position = pos;
        if notify {
            self.notify_positions();
        }
        Ok(())
    }

    /// Interpret the next row of a voice's track
    pub(super) fn parse_track_row<C: VirtualChannel>(
        &mut self,
        idx: usize,
        channels: &mut [C; NUM_VOICES],
    ) -> PlayResult {
        let module = Arc::clone(&self.module);
        if self.voices[idx].track_number == 0xfe {
            self.stop_and_reset(channels)?;
            self.notify_positions();
        }
        if self.voices[idx].track_number == 0xff {
            self.voices[idx].track_position = 0;
            self.parse_next_position(idx, true)?;
            if self.voices[idx].track_number == 0xff {
                self.end_reached(idx);
                return Ok(());
            }
            if self.global.master_volume_fade_speed < 0 {
                self.end_reached(idx);
            }
        }
        let parse_row = self.parse_row;
        let features = module.features();
        let voice = &mut self.voices[idx];
        let track = module
            .tracks
            .get(usize::from(voice.track_number))
            .and_then(Option::as_deref)
            .ok_or(PlaybackError::Inconsistency("position list refers to a missing track"))?;
        let mut row = Row {
            track,
            pos: voice.track_position,
        };
        if features.effects.contains(Effects::RESET_VOLUME) && row.pos == 0 {
            voice.track_volume = 64;
        }
        let first = row.next()?;
        voice.portamento = 0;
        voice.stop_reset_effect = false;
        voice.mute = false;
        if features.track.is_chained() {
            voice.note_and_flag = 0;
        }
        let selected = parse_row(&mut row, first, voice, &mut self.global)?;
        if let Some(n) = selected
            && voice.instrument_number != Some(n)
        {
            voice.instrument_number = Some(n);
            voice.note_and_flag = 0;
        }
        if voice.note_and_flag & 0x80 == 0 {
            start_note(&module, voice, &mut channels[idx])?;
        }
        voice.note = voice.note.wrapping_add_signed(self.global.global_transpose);
        voice.period = period(voice.note, voice.transpose);
        voice.tick_counter = 0;
        voice.vibrato_depth = 0;
        voice.track_position = row.pos;
        if row.peek()? == 0xff {
            voice.track_position = 0;
            voice.loop_track_counter = voice.loop_track_counter.wrapping_sub(1);
            if voice.loop_track_counter == 0 {
                self.parse_next_position(idx, true)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(dialect: TrackDialect, bytes: &[u8]) -> (VoiceState, GlobalState, Option<u8>, usize) {
        let mut voice = VoiceState::new(dialect);
        let mut global = GlobalState::new(0);
        let mut row = Row {
            track: bytes,
            pos: 0,
        };
        let first = row.next().unwrap();
        let instr = dialect.parser()(&mut row, first, &mut voice, &mut global).unwrap();
        (voice, global, instr, row.pos)
    }

    #[test]
    fn v1_rows() {
        let (v, _, instr, len) = parse(TrackDialect::V1, &[0x83, 0x05, 0x30, 0xff]);
        assert_eq!((v.speed_counter, instr, v.note, len), (3, Some(5), 0x30, 3));
        let (v, _, instr, _) = parse(TrackDialect::V1, &[0xc2, 0xc4, 0xb0, 0xff]);
        assert_eq!((v.portamento, instr, v.note_and_flag, v.note), (0xc4, None, 0xb0, 0x30));
        assert_eq!(v.envelope_position, 3);
    }

    #[test]
    fn v2_rows() {
        let (v, _, instr, len) = parse(TrackDialect::V2, &[0x83, 0x20, 0x06, 0x30, 0xff]);
        assert_eq!((instr, v.track_volume, v.speed_counter, v.note), (Some(3), 0x20, 6, 0x30));
        assert_eq!(len, 4);
        let (v, _, instr, len) = parse(TrackDialect::V2, &[0x04, 0x30, 0xff]);
        assert_eq!((instr, v.speed_counter, len), (None, 4, 2));
    }

    #[test]
    fn v3_chain() {
        let bytes = [0x80, 0x02, 0x81, 0x10, 0x8e, 0x08, 0x8a, 0x03, 0x05, 0x24, 0xff];
        let (v, _, instr, len) = parse(TrackDialect::V3, &bytes);
        assert_eq!(instr, Some(2));
        assert_eq!(v.track_volume, 0x18);
        assert_eq!(v.max_speed_counter, 3);
        assert_eq!((v.speed_counter, v.note, len), (5, 0x24, 10));
    }

    #[test]
    fn v4_commands() {
        let bytes = [0x80, 0x01, 0x83, 0x40, 0x87, 0x00, 0x3c, 0x02, 0xff];
        let (v, g, instr, len) = parse(TrackDialect::V4, &bytes);
        assert_eq!(instr, Some(1));
        assert_eq!(g.speed_variation2_speed, 0x40);
        assert_eq!(v.note_and_flag, 0xff);
        assert_eq!((v.note, v.speed_counter, len), (0x3c, 2, 8));
    }

    #[test]
    fn v4_mute_takes_no_argument() {
        let (v, _, _, len) = parse(TrackDialect::V4, &[0x81, 0x07, 0xff]);
        assert!(v.mute);
        assert_eq!((v.note, v.speed_counter, len), (64, 7, 2));
    }

    #[test]
    fn v5_commands() {
        let bytes = [0x86, 0xfe, 0x87, 0x30, 0x8b, 0x02, 0x80, 0x90, 0x30, 0x04, 0xff];
        let (v, g, instr, _) = parse(TrackDialect::V5, &bytes);
        assert_eq!(g.global_transpose, -2);
        assert_eq!(v.track_volume, 0x32);
        // Instrument arguments with bit 7 set select nothing
        assert_eq!(instr, None);
        assert_eq!((v.note, v.speed_counter), (0x30, 4));
    }

    #[test]
    fn row_past_track_end() {
        let mut voice = VoiceState::new(TrackDialect::V3);
        let mut global = GlobalState::new(0);
        let mut row = Row {
            track: &[0x80],
            pos: 1,
        };
        assert!(matches!(
            row_v3(&mut row, 0x80, &mut voice, &mut global),
            Err(PlaybackError::Inconsistency(_))
        ));
    }
}
