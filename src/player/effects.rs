//! Per tick effects.
//!
//! Which effects a replayer has is known once the module is loaded, so the effects are put into
//! two fixed pipelines up front instead of checking the feature flags on every tick.

use {
    super::voice::VoiceState,
    crate::{
        features::{Effects, Features, InstrumentEffects, PortamentoVibrato, VibratoTable},
        module::{ENVELOPE_POINTS, Module},
        result::{PlayResult, PlaybackError},
        tables::{VIBRATO_COUNTERS, VIBRATO_DEPTHS_DIVISION, VIBRATO_DEPTHS_HALVING, period},
    },
    arrayvec::ArrayVec,
};

/// One effect, applied to one voice for one tick
pub(super) type Effect = fn(&Module, &mut VoiceState) -> PlayResult;

/// Effects in the order they run
pub(super) type Pipeline = ArrayVec<Effect, 7>;

/// Effects for ticks that don't start a track row
pub(super) fn between_rows(features: &Features) -> Pipeline {
    let fx = features.effects;
    let mut p = Pipeline::new();
    p.push(match features.portamento_vibrato {
        PortamentoVibrato::OnlyOne => portamento_or_vibrato,
        PortamentoVibrato::BothTogether => vibrato_and_portamento,
    });
    if fx.contains(Effects::SET_NOTE) {
        p.push(set_note);
    }
    if fx.contains(Effects::SET_FIXED_SAMPLE) {
        p.push(set_fixed_sample);
    }
    if fx.contains(Effects::SET_ARPEGGIO) {
        p.push(set_arpeggio_or_sample);
    } else {
        push_sample_and_arpeggio(&mut p, fx);
    }
    push_tail(&mut p, fx);
    p
}

/// Effects for the tick a track row was parsed on
pub(super) fn on_row(features: &Features) -> Pipeline {
    let fx = features.effects;
    let mut p = Pipeline::new();
    push_sample_and_arpeggio(&mut p, fx);
    push_tail(&mut p, fx);
    p
}

fn push_sample_and_arpeggio(p: &mut Pipeline, fx: Effects) {
    if fx.contains(Effects::SET_SAMPLE) {
        p.push(set_sample);
    }
    if fx.contains(Effects::ARPEGGIO) {
        p.push(arpeggio);
    }
}

fn push_tail(p: &mut Pipeline, fx: Effects) {
    if fx.contains(Effects::ENVELOPE) {
        p.push(envelope);
    }
    p.push(counters);
}

fn portamento_or_vibrato(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if voice.portamento == 0 {
        vibrato(module, voice)
    } else {
        portamento(voice);
        Ok(())
    }
}

fn vibrato_and_portamento(module: &Module, voice: &mut VoiceState) -> PlayResult {
    vibrato(module, voice)?;
    if voice.portamento != 0 {
        portamento(voice);
    }
    Ok(())
}

fn portamento(voice: &mut VoiceState) {
    let amount = u16::from(voice.portamento & 0x3f);
    voice.period = if voice.portamento >= 0xc0 {
        voice.period.wrapping_add(amount)
    } else {
        voice.period.wrapping_sub(amount)
    };
}

fn vibrato(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if voice.vibrato_delay != 0 {
        voice.vibrato_delay -= 1;
        return Ok(());
    }
    if voice.stop_reset_delay != 0 {
        return Ok(());
    }
    let Some(instr) = voice.instrument(module)? else {
        return Ok(());
    };
    let number = usize::from(instr.vibrato_number);
    if number == 0 {
        return Ok(());
    }
    if voice.vibrato_depth < 0 {
        swing(voice);
        return Ok(());
    }
    let oob = PlaybackError::Inconsistency("vibrato number out of range");
    let depths = match module.features().vibrato {
        VibratoTable::Halving => &VIBRATO_DEPTHS_HALVING,
        VibratoTable::Division => &VIBRATO_DEPTHS_DIVISION,
    };
    voice.vibrato_counter_max = *VIBRATO_COUNTERS.get(number).ok_or(oob)?;
    let mut depth = *depths.get(number).ok_or(oob)?;
    voice.vibrato_count_direction = false;
    voice.vibrato_counter = 0;
    voice.period = period(voice.note, voice.transpose);
    let mut speed = voice
        .period
        .wrapping_sub(period(voice.note.wrapping_add(1), voice.transpose));
    match module.features().vibrato {
        VibratoTable::Halving => loop {
            depth -= 1;
            if depth < 0 {
                break;
            }
            speed /= 2;
            if speed == 0 {
                speed = 1;
                break;
            }
        },
        VibratoTable::Division => {
            // A zero depth would divide by zero; it is treated as no division
            let divisor = u16::try_from(depth).unwrap_or(1).max(1);
            speed = (speed / divisor).max(1);
        }
    }
    voice.vibrato_speed = speed;
    voice.vibrato_depth = -1;
    Ok(())
}

const fn swing(voice: &mut VoiceState) {
    voice.period = if voice.vibrato_direction {
        voice.period.wrapping_sub(voice.vibrato_speed)
    } else {
        voice.period.wrapping_add(voice.vibrato_speed)
    };
    if voice.vibrato_count_direction {
        voice.vibrato_counter = voice.vibrato_counter.wrapping_sub(1);
        if voice.vibrato_counter == 0 {
            voice.vibrato_count_direction = false;
        }
    } else {
        voice.vibrato_counter = voice.vibrato_counter.wrapping_add(1);
        if voice.vibrato_counter == voice.vibrato_counter_max {
            voice.vibrato_count_direction = true;
            voice.vibrato_direction = !voice.vibrato_direction;
        }
    }
}

/// Alternate between the note and the instrument's fixed note
fn set_note(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if !voice.effects.contains(InstrumentEffects::SET_NOTE) {
        return Ok(());
    }
    let Some(instr) = voice.instrument(module)? else {
        return Ok(());
    };
    let note = if voice.tick_counter % 2 == 0 {
        voice.note.wrapping_add_signed(voice.transpose)
    } else if instr.fixed_note & 0x80 != 0 {
        (instr.fixed_note & 0x7f).wrapping_add(voice.note)
    } else {
        instr.fixed_note
    };
    voice.period = period(note, 0);
    Ok(())
}

/// Alternate between the instrument's sample and sample 2, sliding the period up
fn set_fixed_sample(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if !voice.effects.contains(InstrumentEffects::SET_FIXED_SAMPLE) {
        return Ok(());
    }
    let Some(instr) = voice.instrument(module)? else {
        return Ok(());
    };
    voice.sample = if voice.tick_counter % 2 == 0 {
        instr.sample
    } else {
        2
    };
    let slid = u32::from(voice.period) + u32::from(instr.portamento_add);
    if slid < 0x8000 {
        voice.period += u16::from(instr.portamento_add);
    }
    Ok(())
}

fn set_arpeggio_or_sample(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if voice.effects.contains(InstrumentEffects::SET_ARPEGGIO) {
        let tick = voice.tick_counter;
        return set_arpeggio(module, voice, tick);
    }
    let fx = module.features().effects;
    if fx.contains(Effects::SET_SAMPLE) {
        set_sample(module, voice)?;
    }
    if fx.contains(Effects::ARPEGGIO) {
        arpeggio(module, voice)?;
    }
    Ok(())
}

/// Use the secondary sample while the reset delay runs
fn set_sample(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if !voice.effects.contains(InstrumentEffects::SET_SAMPLE) {
        return Ok(());
    }
    let Some(instr) = voice.instrument(module)? else {
        return Ok(());
    };
    if voice.stop_reset_delay != 0 {
        voice.sample = instr.sample2;
    } else if !voice.stop_reset_effect {
        voice.sample = instr.sample;
    }
    Ok(())
}

/// Arpeggio while the reset delay runs, then back to the plain note
fn arpeggio(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if !voice.effects.contains(InstrumentEffects::ARPEGGIO) {
        return Ok(());
    }
    if voice.stop_reset_delay != 0 {
        let tick = voice.tick_counter;
        set_arpeggio(module, voice, tick)?;
    } else if !voice.stop_reset_effect {
        voice.period = period(voice.note, voice.transpose);
    }
    Ok(())
}

fn set_arpeggio(module: &Module, voice: &mut VoiceState, tick: u8) -> PlayResult {
    let Some(instr) = voice.instrument(module)? else {
        return Ok(());
    };
    let value = instr.arpeggio[usize::from(tick & 3)];
    let note = match u8::try_from(value) {
        Ok(absolute) => absolute,
        Err(_) => {
            let rel = value.cast_unsigned() & 0x7f;
            let note = if rel < 64 {
                voice.note.wrapping_add(rel)
            } else {
                voice.note.wrapping_sub(rel & 0x3f)
            };
            note.wrapping_add_signed(voice.transpose)
        }
    };
    voice.period = period(note, 0);
    Ok(())
}

fn envelope(module: &Module, voice: &mut VoiceState) -> PlayResult {
    if voice.note_and_flag & 0x80 == 0
        && voice.tick_counter == 0
        && let Some(instr) = voice.instrument(module)?
    {
        let env = module
            .envelopes
            .get(usize::from(instr.envelope))
            .ok_or(PlaybackError::Inconsistency("envelope out of range"))?;
        voice.envelope = Some(instr.envelope);
        voice.envelope_loop_count = env.points[0].times_to_repeat;
        voice.envelope_position = 0;
        voice.envelope_wait = 1;
        voice.volume = 0;
    }
    if voice.envelope_wait < 0 {
        return Ok(());
    }
    voice.envelope_wait -= 1;
    if voice.envelope_wait != 0 {
        return Ok(());
    }
    let Some(env) = voice.envelope.and_then(|n| module.envelopes.get(usize::from(n))) else {
        return Ok(());
    };
    let Some(point) = env.points.get(usize::from(voice.envelope_position)) else {
        voice.envelope_wait = -1;
        return Ok(());
    };
    let volume = i32::from(voice.volume) + i32::from(point.volume_increment);
    voice.volume = u16::try_from(volume.clamp(0, 64)).unwrap_or(0);
    voice.envelope_loop_count = voice.envelope_loop_count.wrapping_sub(1);
    if voice.envelope_loop_count != 0 {
        voice.envelope_wait = point.ticks_to_wait.cast_signed();
        return Ok(());
    }
    let mut pos = usize::from(voice.envelope_position) + 1;
    let mut ticks = env.points.get(pos).map(|p| p.ticks_to_wait);
    if let Some(jump) = ticks.filter(|&t| t >= 0xc0) {
        pos = usize::from(jump & 0x3f) / 3;
        ticks = env.points.get(pos).map(|p| p.ticks_to_wait);
    }
    // Running off the end, past the sentinel, halts the envelope
    let Some(ticks) = ticks else {
        voice.envelope_wait = -1;
        return Ok(());
    };
    voice.envelope_wait = ticks.cast_signed();
    if pos != ENVELOPE_POINTS - 1 {
        voice.envelope_loop_count = env.points[pos].times_to_repeat;
    }
    voice.envelope_position = u8::try_from(pos).unwrap_or_default();
    Ok(())
}

fn counters(_module: &Module, voice: &mut VoiceState) -> PlayResult {
    if voice.stop_reset_delay == 0 {
        voice.stop_reset_effect = true;
    } else {
        voice.stop_reset_delay -= 1;
    }
    voice.tick_counter = voice.tick_counter.wrapping_add(1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            features::{InstrumentLayout, SpeedVariation, TrackDialect},
            module::{Envelope, EnvelopePoint, Instrument},
            testing::ImageBuilder,
        },
    };

    fn module_with(effects: Effects, instrument: Instrument, envelopes: Vec<Envelope>) -> Module {
        let features = Features {
            track: TrackDialect::V3,
            instruments: InstrumentLayout::V3,
            speed_variation: SpeedVariation::Table,
            vibrato: VibratoTable::Halving,
            portamento_vibrato: PortamentoVibrato::OnlyOne,
            effects,
        };
        let img = ImageBuilder::new(features).build();
        let mut module = crate::load(&img.data).unwrap();
        module.instruments = vec![instrument];
        module.envelopes = envelopes;
        module
    }

    fn playing_voice() -> VoiceState {
        VoiceState {
            note: 48,
            instrument: Some(0),
            instrument_number: Some(0),
            period: 428,
            ..VoiceState::new(TrackDialect::V3)
        }
    }

    #[test]
    fn pipelines_follow_features() {
        let mut f = Features {
            track: TrackDialect::V1,
            instruments: InstrumentLayout::V1,
            speed_variation: SpeedVariation::Table,
            vibrato: VibratoTable::Halving,
            portamento_vibrato: PortamentoVibrato::OnlyOne,
            effects: Effects::empty(),
        };
        assert_eq!(between_rows(&f).len(), 2);
        assert_eq!(on_row(&f).len(), 1);
        f.effects = Effects::all();
        assert_eq!(between_rows(&f).len(), 6);
        assert_eq!(on_row(&f).len(), 4);
        f.effects = Effects::all() - Effects::SET_ARPEGGIO;
        assert_eq!(between_rows(&f).len(), 7);
    }

    #[test]
    fn portamento_direction() {
        let mut v = playing_voice();
        v.portamento = 0xc3;
        portamento(&mut v);
        assert_eq!(v.period, 431);
        v.portamento = 0x05;
        portamento(&mut v);
        assert_eq!(v.period, 426);
    }

    #[test]
    fn vibrato_halving_swings() {
        let instr = Instrument {
            vibrato_number: 1,
            ..Instrument::default()
        };
        let module = module_with(Effects::empty(), instr, Vec::new());
        let mut v = playing_voice();
        vibrato(&module, &mut v).unwrap();
        // 428 - 404 = 24, halved 3 times
        assert_eq!(v.vibrato_speed, 3);
        assert_eq!(v.vibrato_depth, -1);
        assert_eq!(v.vibrato_counter_max, VIBRATO_COUNTERS[1]);
        let mut periods = Vec::new();
        for _ in 0..6 {
            vibrato(&module, &mut v).unwrap();
            periods.push(v.period);
        }
        // Up for 2 ticks, then down
        assert_eq!(periods, [431, 434, 431, 428, 425, 422]);
    }

    #[test]
    fn vibrato_division_swings() {
        let instr = Instrument {
            vibrato_number: 1,
            ..Instrument::default()
        };
        let mut module = module_with(Effects::empty(), instr, Vec::new());
        module.detection.features.vibrato = VibratoTable::Division;
        let mut v = playing_voice();
        vibrato(&module, &mut v).unwrap();
        // 428 - 404 = 24, divided by 8
        assert_eq!(v.vibrato_speed, 3);
        assert_eq!(v.vibrato_counter_max, 2);
        let mut periods = Vec::new();
        for _ in 0..6 {
            vibrato(&module, &mut v).unwrap();
            periods.push(v.period);
        }
        assert_eq!(periods, [431, 434, 431, 428, 425, 422]);
    }

    #[test]
    fn vibrato_division_never_stands_still() {
        let instr = Instrument {
            vibrato_number: 9,
            ..Instrument::default()
        };
        let mut module = module_with(Effects::empty(), instr, Vec::new());
        module.detection.features.vibrato = VibratoTable::Division;
        let mut v = playing_voice();
        // 47 - 45 = 2, divided by 12 rounds down to 0
        v.note = 86;
        vibrato(&module, &mut v).unwrap();
        assert_eq!(v.period, 47);
        assert_eq!(v.vibrato_speed, 1);
        assert_eq!(v.vibrato_counter_max, 3);
        let mut periods = Vec::new();
        for _ in 0..7 {
            vibrato(&module, &mut v).unwrap();
            periods.push(v.period);
        }
        // Up for 3 ticks, then down
        assert_eq!(periods, [48, 49, 50, 49, 48, 47, 46]);
    }

    #[test]
    fn vibrato_waits_for_delay() {
        let instr = Instrument {
            vibrato_number: 1,
            ..Instrument::default()
        };
        let module = module_with(Effects::empty(), instr, Vec::new());
        let mut v = playing_voice();
        v.vibrato_delay = 2;
        vibrato(&module, &mut v).unwrap();
        vibrato(&module, &mut v).unwrap();
        assert_eq!(v.vibrato_delay, 0);
        assert_eq!(v.vibrato_depth, 0);
        vibrato(&module, &mut v).unwrap();
        assert_eq!(v.vibrato_depth, -1);
    }

    #[test]
    fn vibrato_number_out_of_range() {
        let instr = Instrument {
            vibrato_number: 200,
            ..Instrument::default()
        };
        let module = module_with(Effects::empty(), instr, Vec::new());
        let mut v = playing_voice();
        assert!(matches!(
            vibrato(&module, &mut v),
            Err(PlaybackError::Inconsistency(_))
        ));
    }

    #[test]
    fn arpeggio_notes() {
        let instr = Instrument {
            arpeggio: [48, -116, -60, 60],
            ..Instrument::default()
        };
        let module = module_with(Effects::empty(), instr, Vec::new());
        let mut v = playing_voice();
        v.transpose = 1;
        set_arpeggio(&module, &mut v, 0).unwrap();
        assert_eq!(v.period, 428);
        // 0x8c: 12 up, plus transpose
        set_arpeggio(&module, &mut v, 1).unwrap();
        assert_eq!(v.period, period(61, 0));
        // 0xc4: 4 down, plus transpose
        set_arpeggio(&module, &mut v, 2).unwrap();
        assert_eq!(v.period, period(45, 0));
        set_arpeggio(&module, &mut v, 7).unwrap();
        assert_eq!(v.period, period(60, 0));
    }

    #[test]
    fn set_note_alternates() {
        let instr = Instrument {
            fixed_note: 0x80 | 12,
            ..Instrument::default()
        };
        let module = module_with(Effects::SET_NOTE, instr, Vec::new());
        let mut v = playing_voice();
        v.effects = InstrumentEffects::SET_NOTE;
        set_note(&module, &mut v).unwrap();
        assert_eq!(v.period, 428);
        v.tick_counter = 1;
        set_note(&module, &mut v).unwrap();
        assert_eq!(v.period, 214);
    }

    #[test]
    fn set_fixed_sample_alternates() {
        let instr = Instrument {
            sample: 5,
            portamento_add: 3,
            ..Instrument::default()
        };
        let module = module_with(Effects::SET_FIXED_SAMPLE, instr, Vec::new());
        let mut v = playing_voice();
        // Without the instrument flag nothing changes
        set_fixed_sample(&module, &mut v).unwrap();
        assert_eq!((v.sample, v.period), (0, 428));
        v.effects = InstrumentEffects::SET_FIXED_SAMPLE;
        let mut seen = Vec::new();
        for _ in 0..4 {
            set_fixed_sample(&module, &mut v).unwrap();
            counters(&module, &mut v).unwrap();
            seen.push((v.sample, v.period));
        }
        assert_eq!(seen, [(5, 431), (2, 434), (5, 437), (2, 440)]);
        // The slide stops short of 0x8000
        v.period = 0x7ffc;
        set_fixed_sample(&module, &mut v).unwrap();
        assert_eq!(v.period, 0x7fff);
        set_fixed_sample(&module, &mut v).unwrap();
        assert_eq!(v.period, 0x7fff);
    }

    #[test]
    fn set_sample_until_reset() {
        let instr = Instrument {
            sample: 1,
            sample2: 7,
            ..Instrument::default()
        };
        let module = module_with(Effects::SET_SAMPLE, instr, Vec::new());
        let mut v = playing_voice();
        v.effects = InstrumentEffects::SET_SAMPLE;
        v.stop_reset_delay = 2;
        let mut samples = Vec::new();
        for _ in 0..4 {
            set_sample(&module, &mut v).unwrap();
            counters(&module, &mut v).unwrap();
            samples.push(v.sample);
        }
        // Secondary sample while the delay runs, then the plain one
        assert_eq!(samples, [7, 7, 1, 1]);
        assert!(v.stop_reset_effect);
        // Once the reset effect is set, the sample is left alone
        v.sample = 9;
        set_sample(&module, &mut v).unwrap();
        assert_eq!(v.sample, 9);
        // Without the instrument flag nothing changes
        v.effects = InstrumentEffects::empty();
        v.stop_reset_delay = 1;
        set_sample(&module, &mut v).unwrap();
        assert_eq!(v.sample, 9);
    }

    #[test]
    fn counters_stop_reset() {
        let module = module_with(Effects::empty(), Instrument::default(), Vec::new());
        let mut v = playing_voice();
        v.stop_reset_delay = 1;
        counters(&module, &mut v).unwrap();
        assert!(!v.stop_reset_effect);
        counters(&module, &mut v).unwrap();
        assert!(v.stop_reset_effect);
        assert_eq!(v.tick_counter, 2);
    }

    fn point(ticks_to_wait: u8, volume_increment: i8, times_to_repeat: u8) -> EnvelopePoint {
        EnvelopePoint {
            ticks_to_wait,
            volume_increment,
            times_to_repeat,
        }
    }

    #[test]
    fn envelope_attack_then_hold() {
        let env = Envelope {
            points: [
                point(1, 16, 4),
                point(1, -8, 2),
                point(0, 0, 0),
                point(0, 0, 0),
                point(0, 0, 0),
                point(0, 0, 0),
            ],
        };
        let module = module_with(Effects::ENVELOPE, Instrument::default(), vec![env]);
        let mut v = playing_voice();
        let mut volumes = Vec::new();
        for _ in 0..8 {
            envelope(&module, &mut v).unwrap();
            counters(&module, &mut v).unwrap();
            volumes.push(v.volume);
        }
        assert_eq!(volumes, [16, 32, 48, 64, 56, 48, 48, 48]);
        // Point 2 waits 0 ticks, so the counter went negative and stopped
        assert!(v.envelope_wait < 0);
    }

    #[test]
    fn envelope_jump() {
        let env = Envelope {
            points: [
                point(1, 10, 1),
                point(1, 1, 2),
                point(0xc0 | 3, 0, 0),
                point(0, 0, 0),
                point(0, 0, 0),
                point(0, 0, 0),
            ],
        };
        let module = module_with(Effects::ENVELOPE, Instrument::default(), vec![env]);
        let mut v = playing_voice();
        let mut volumes = Vec::new();
        for _ in 0..6 {
            envelope(&module, &mut v).unwrap();
            counters(&module, &mut v).unwrap();
            volumes.push(v.volume);
        }
        // 0xC3 jumps back to point 1, which keeps adding 1
        assert_eq!(volumes, [10, 11, 12, 13, 14, 15]);
        assert_eq!(v.envelope_position, 1);
    }
}
