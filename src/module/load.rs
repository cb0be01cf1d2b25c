use crate::{
    NUM_SAMPLES, NUM_VOICES,
    detect::{Detection, identify},
    features::{Effects, InstrumentEffects, InstrumentLayout, TrackDialect},
    io::{ReadError, Reader, SectionExt},
    module::{
        ENVELOPE_POINTS, Envelope, EnvelopePoint, Instrument, MAX_POSITION_LIST_LEN, Module,
        Sample, SubSong,
    },
    result::{LoadError, LoadResult, Section},
};

const SUB_SONG_SIZE: usize = 16;
const ENVELOPE_SIZE: usize = 16;
const INSTRUMENT_SIZE: usize = 16;
const SAMPLE_HEADER_SIZE: u32 = 6;

/// Detect and load a module.
///
/// # Errors
///
/// [`LoadError::NotRecognized`] if `data` is not a module, or any other [`LoadError`] if it is
/// one, but is damaged.
pub fn load(data: &[u8]) -> LoadResult<Module> {
    let det = identify(data)?.ok_or(LoadError::NotRecognized)?;
    load_detected(data, &det)
}

/// Load a module that [`identify`] already recognized.
///
/// # Errors
///
/// If a table can't be read, or is inconsistent.
pub fn load_detected(data: &[u8], det: &Detection) -> LoadResult<Module> {
    let mut rd = Reader::new(data);
    let off = &det.offsets;
    let features = &det.features;

    let speed_init = match off.speed_init {
        Some(at) => {
            rd.seek(at);
            rd.u8().section(Section::Info)?
        }
        None => 0,
    };
    let sub_songs = read_sub_songs(&mut rd, off.sub_song_list, off.position_lists)?;
    let tracks = read_tracks(&mut rd, off.track_offsets, off.tracks, features.track)?;
    let envelopes = match off.envelopes {
        Some(at) => read_envelopes(&mut rd, at, off.instruments)?,
        None => Vec::new(),
    };
    let instruments = read_instruments(
        &mut rd,
        off.instruments,
        off.track_offsets,
        features.instruments,
    )?;
    let mut samples = vec![Sample::default(); NUM_SAMPLES];
    if let Some(at) = off.sample_info {
        read_sample_info(&mut rd, at, &mut samples).section(Section::SampleInfo)?;
    }
    read_sample_data(
        &mut rd,
        off.sample_start_offsets,
        off.sample_data,
        features.effects.contains(Effects::SEPARATE_SAMPLE_INFO),
        &mut samples,
    )?;
    log::info!(
        "Loaded module: {} sub-songs, {} tracks, {} instruments, {} envelopes",
        sub_songs.len(),
        tracks.len(),
        instruments.len(),
        envelopes.len()
    );
    Ok(Module {
        detection: *det,
        speed_init,
        sub_songs,
        tracks,
        envelopes,
        instruments,
        samples,
    })
}

/// Number of `size` byte records between two table offsets
fn record_count(from: usize, to: usize, size: usize, section: Section) -> LoadResult<usize> {
    to.checked_sub(from)
        .map(|len| len / size)
        .ok_or(LoadError::Malformed(section))
}

fn read_sub_songs(rd: &mut Reader, list: usize, position_lists: usize) -> LoadResult<Vec<SubSong>> {
    let count = record_count(list, position_lists, SUB_SONG_SIZE, Section::SubSongs)?;
    if count == 0 {
        return Err(LoadError::Malformed(Section::SubSongs));
    }
    log::debug!("{count} sub-songs");
    let mut songs = Vec::with_capacity(count);
    for i in 0..count {
        rd.seek(list + i * SUB_SONG_SIZE);
        let offsets: [u16; NUM_VOICES] = rd.next::<[[u8; 2]; NUM_VOICES]>()
            .map(|words| words.map(u16::from_be_bytes))
            .section(Section::SubSongs)?;
        let mut speed_variation = [0; 8];
        rd.fill_i8(&mut speed_variation).section(Section::SubSongs)?;
        let mut lists: [Vec<u8>; NUM_VOICES] = Default::default();
        for (list, offset) in lists.iter_mut().zip(offsets) {
            rd.seek(position_lists + usize::from(offset));
            *list = read_position_list(rd)?;
        }
        songs.push(SubSong {
            position_lists: lists,
            speed_variation,
        });
    }
    Ok(songs)
}

fn read_position_list(rd: &mut Reader) -> LoadResult<Vec<u8>> {
    let mut list = Vec::new();
    loop {
        let dat = rd.u8().section(Section::PositionList)?;
        list.push(dat);
        // Markers from 0xFD and plain entries carry an argument, loop starts don't
        if dat >= 0xfd || dat & 0x40 == 0 {
            list.push(rd.u8().section(Section::PositionList)?);
        }
        if list.len() > MAX_POSITION_LIST_LEN {
            return Err(LoadError::Malformed(Section::PositionList));
        }
        if dat >= 0xfe {
            return Ok(list);
        }
    }
}

type TrackDecoder = fn(&mut Reader) -> Result<Vec<u8>, ReadError>;

impl TrackDialect {
    /// Track decoder for this dialect
    fn decoder(self) -> TrackDecoder {
        match self {
            Self::V1 => read_track_v1,
            Self::V2 => read_track_v2,
            Self::V3 => read_track_v3,
            Self::V4 | Self::V5 => read_track_v4,
        }
    }
}

fn read_track_v1(rd: &mut Reader) -> Result<Vec<u8>, ReadError> {
    read_track(rd, read_args::<1>)
}

fn read_track_v2(rd: &mut Reader) -> Result<Vec<u8>, ReadError> {
    read_track(rd, read_args::<2>)
}

fn read_track_v3(rd: &mut Reader) -> Result<Vec<u8>, ReadError> {
    read_track(rd, read_chain)
}

fn read_track_v4(rd: &mut Reader) -> Result<Vec<u8>, ReadError> {
    read_track(rd, read_chain_unless_mute)
}

/// Read a track up to and including the `0xFF` end marker
fn read_track(
    rd: &mut Reader,
    args: fn(u8, &mut Reader, &mut Vec<u8>) -> Result<(), ReadError>,
) -> Result<Vec<u8>, ReadError> {
    let mut track = Vec::new();
    loop {
        let dat = rd.u8()?;
        track.push(dat);
        if dat == 0xff {
            return Ok(track);
        }
        args(dat, rd, &mut track)?;
        track.push(rd.u8()?);
    }
}

/// A command byte is followed by `N` argument bytes
fn read_args<const N: usize>(
    dat: u8,
    rd: &mut Reader,
    track: &mut Vec<u8>,
) -> Result<(), ReadError> {
    if dat & 0x80 != 0 {
        track.extend_from_slice(rd.bytes(N)?);
    }
    Ok(())
}

/// Commands with one argument each are chained until a note follows
fn read_chain(mut dat: u8, rd: &mut Reader, track: &mut Vec<u8>) -> Result<(), ReadError> {
    while dat & 0x80 != 0 {
        track.push(rd.u8()?);
        dat = rd.u8()?;
        track.push(dat);
    }
    Ok(())
}

/// Like [`read_chain`], but the mute command stands alone
fn read_chain_unless_mute(dat: u8, rd: &mut Reader, track: &mut Vec<u8>) -> Result<(), ReadError> {
    if dat == 0x81 {
        return Ok(());
    }
    read_chain(dat, rd, track)
}

fn read_tracks(
    rd: &mut Reader,
    offsets: usize,
    base: usize,
    dialect: TrackDialect,
) -> LoadResult<Vec<Option<Vec<u8>>>> {
    let count = record_count(offsets, base, 2, Section::Tracks)?;
    rd.seek(offsets);
    let mut track_offsets = Vec::with_capacity(count);
    for _ in 0..count {
        track_offsets.push(rd.i16_be().section(Section::Tracks)?);
    }
    let decode = dialect.decoder();
    let mut tracks = Vec::with_capacity(count);
    for offset in track_offsets {
        // Negative offsets mark unused track numbers
        let Ok(offset) = usize::try_from(offset) else {
            tracks.push(None);
            continue;
        };
        rd.seek(base + offset);
        tracks.push(Some(decode(rd).section(Section::Tracks)?));
    }
    let absent = tracks.iter().filter(|t| t.is_none()).count();
    log::debug!("{count} tracks, {absent} of them absent");
    Ok(tracks)
}

fn read_envelopes(rd: &mut Reader, at: usize, end: usize) -> LoadResult<Vec<Envelope>> {
    let count = record_count(at, end, ENVELOPE_SIZE, Section::Envelopes)?;
    rd.seek(at);
    (0..count)
        .map(|_| read_envelope(rd).section(Section::Envelopes))
        .collect()
}

fn read_envelope(rd: &mut Reader) -> Result<Envelope, ReadError> {
    let mut env = Envelope::default();
    let (stored, sentinel) = env.points.split_at_mut(ENVELOPE_POINTS - 1);
    for point in stored {
        *point = EnvelopePoint {
            ticks_to_wait: rd.u8()?,
            volume_increment: rd.i8()?,
            times_to_repeat: rd.u8()?,
        };
    }
    // Some modules run past the fifth point, into the padding byte
    sentinel[0] = EnvelopePoint {
        ticks_to_wait: rd.u8()?,
        volume_increment: 0,
        times_to_repeat: 0xff,
    };
    Ok(env)
}

type InstrumentDecoder = fn(&mut Reader) -> Result<Instrument, ReadError>;

impl InstrumentLayout {
    /// Record decoder for this layout
    fn decoder(self) -> InstrumentDecoder {
        match self {
            Self::V1 => read_instrument_v1,
            Self::V2 => read_instrument_v2,
            Self::V3 => read_instrument_v3,
        }
    }
}

fn read_instrument_v1(rd: &mut Reader) -> Result<Instrument, ReadError> {
    read_instrument_early(rd, false)
}

fn read_instrument_v2(rd: &mut Reader) -> Result<Instrument, ReadError> {
    read_instrument_early(rd, true)
}

/// The first two layouts only differ in what the second byte is
fn read_instrument_early(rd: &mut Reader, has_volume: bool) -> Result<Instrument, ReadError> {
    let sample = rd.u8()?;
    let second = rd.u8()?;
    let effects = InstrumentEffects::from_bits_retain(rd.u8()?);
    rd.skip(1);
    let portamento_add = rd.u8()?;
    rd.skip(2);
    let stop_reset_delay = rd.u8()?;
    let sample2 = rd.u8()?;
    let mut arpeggio = [0; 4];
    rd.fill_i8(&mut arpeggio)?;
    let (envelope, volume) = if has_volume {
        (0, second)
    } else {
        (second, 0)
    };
    Ok(Instrument {
        sample,
        envelope,
        volume,
        effects,
        portamento_add,
        stop_reset_delay,
        sample2,
        arpeggio,
        fixed_note: rd.u8()?,
        vibrato_number: rd.u8()?,
        vibrato_delay: rd.u8()?,
        ..Instrument::default()
    })
}

fn read_instrument_v3(rd: &mut Reader) -> Result<Instrument, ReadError> {
    let sample = rd.u8()?;
    let volume = rd.u8()?;
    let effects = InstrumentEffects::from_bits_retain(rd.u8()?);
    let transpose = rd.i8()?;
    let fine_tune = rd.i16_be()?;
    let sample_start_offset = rd.u16_be()?;
    let stop_reset_delay = rd.u8()?;
    let mut arpeggio = [0; 4];
    rd.fill_i8(&mut arpeggio)?;
    Ok(Instrument {
        sample,
        volume,
        effects,
        transpose,
        fine_tune,
        sample_start_offset,
        stop_reset_delay,
        arpeggio,
        fixed_note: rd.u8()?,
        vibrato_number: rd.u8()?,
        vibrato_delay: rd.u8()?,
        ..Instrument::default()
    })
}

fn read_instruments(
    rd: &mut Reader,
    at: usize,
    end: usize,
    layout: InstrumentLayout,
) -> LoadResult<Vec<Instrument>> {
    let count = record_count(at, end, INSTRUMENT_SIZE, Section::Instruments)?;
    log::debug!("{count} instruments, {layout:?} layout");
    let decode = layout.decoder();
    (0..count)
        .map(|i| {
            // Records are fixed size, whatever the layout reads
            rd.seek(at + i * INSTRUMENT_SIZE);
            decode(rd).section(Section::Instruments)
        })
        .collect()
}

/// Read a length/loop start/loop length triple
fn read_sample_header(rd: &mut Reader, sample: &mut Sample) -> Result<(), ReadError> {
    sample.length = rd.u16_be()?;
    sample.loop_start = rd.u16_be()?;
    sample.loop_length = rd.u16_be()?;
    Ok(())
}

fn read_sample_info(rd: &mut Reader, at: usize, samples: &mut [Sample]) -> Result<(), ReadError> {
    rd.seek(at);
    samples
        .iter_mut()
        .try_for_each(|sample| read_sample_header(rd, sample))
}

fn read_sample_data(
    rd: &mut Reader,
    starts_at: usize,
    data_at: usize,
    separate_info: bool,
    samples: &mut [Sample],
) -> LoadResult {
    rd.seek(starts_at);
    let mut starts = [0u32; NUM_SAMPLES + 1];
    for start in &mut starts {
        *start = rd.u32_be().section(Section::Samples)?;
    }
    for (sample, bounds) in samples.iter_mut().zip(starts.windows(2)) {
        let len = bounds[1]
            .checked_sub(bounds[0])
            .ok_or(LoadError::Malformed(Section::Samples))?;
        if len == 0 {
            *sample = Sample {
                loop_length: 1,
                ..Sample::default()
            };
            continue;
        }
        let start = usize::try_from(bounds[0])
            .ok()
            .and_then(|start| data_at.checked_add(start))
            .ok_or(LoadError::Malformed(Section::Samples))?;
        rd.seek(start);
        let mut len = len;
        if !separate_info {
            read_sample_header(rd, sample).section(Section::Samples)?;
            len = len
                .checked_sub(SAMPLE_HEADER_SIZE)
                .ok_or(LoadError::Malformed(Section::Samples))?;
        }
        let len = usize::try_from(len).map_err(|_| LoadError::Malformed(Section::Samples))?;
        sample.data = rd.sample_data(len).section(Section::Samples)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            features::{Features, PortamentoVibrato, SpeedVariation, VibratoTable},
            testing::ImageBuilder,
        },
    };

    fn features(track: TrackDialect, instruments: InstrumentLayout, effects: Effects) -> Features {
        Features {
            track,
            instruments,
            speed_variation: SpeedVariation::Table,
            vibrato: VibratoTable::Halving,
            portamento_vibrato: PortamentoVibrato::OnlyOne,
            effects,
        }
    }

    #[test]
    fn not_recognized() {
        assert_eq!(load(&[0; 2048]).unwrap_err(), LoadError::NotRecognized);
    }

    #[test]
    fn sub_songs_and_position_lists() {
        let f = features(TrackDialect::V4, InstrumentLayout::V3, Effects::empty());
        let looped = vec![0x42, 0x01, 0x00, 0x01, 0x01, 0xfd, 0x03, 0xff, 0x00];
        let module = ImageBuilder::new(f)
            .sub_song(
                [looped.clone(), vec![0xfe, 0x00], vec![0xfe, 0x00], vec![0xfe, 0x00]],
                [1, 2, 3, 4, 5, 6, 7, -8],
            )
            .sub_song(
                [vec![0x01, 0x00, 0xff, 0x00], vec![0xfe, 0x00], vec![0xfe, 0x00], vec![0xfe, 0x00]],
                [0; 8],
            )
            .build();
        let module = load(&module.data).unwrap();
        assert_eq!(module.sub_song_count(), 2);
        assert_eq!(module.sub_songs[0].position_lists[0], looped);
        assert_eq!(module.sub_songs[0].position_lists[3], [0xfe, 0x00]);
        assert_eq!(module.sub_songs[0].speed_variation[7], -8);
        assert_eq!(module.sub_songs[1].position_lists[0], [0x01, 0x00, 0xff, 0x00]);
    }

    #[test]
    fn oversize_position_list() {
        let f = features(TrackDialect::V4, InstrumentLayout::V3, Effects::empty());
        let mut long = [0x01, 0x00].repeat(64);
        long.extend([0xff, 0x00]);
        let end = vec![0xff, 0x00];
        let image = ImageBuilder::new(f)
            .sub_song([long, end.clone(), end.clone(), end], [0; 8])
            .build();
        assert_eq!(
            load(&image.data).unwrap_err(),
            LoadError::Malformed(Section::PositionList)
        );
    }

    #[test]
    fn track_dialects() {
        let cases: [(TrackDialect, &[u8]); 5] = [
            (TrackDialect::V1, &[0x85, 0x03, 0x30, 0x02, 0x32, 0xff]),
            (TrackDialect::V2, &[0x85, 0x10, 0x06, 0x30, 0xff]),
            (TrackDialect::V3, &[0x80, 0x01, 0x81, 0x20, 0x06, 0x30, 0xff]),
            (TrackDialect::V4, &[0x81, 0x06, 0x80, 0x01, 0x30, 0x06, 0xff]),
            (TrackDialect::V5, &[0x86, 0x02, 0x30, 0x06, 0xff]),
        ];
        for (dialect, track) in cases {
            let f = features(dialect, InstrumentLayout::V3, Effects::empty());
            let image = ImageBuilder::new(f).track(track).absent_track().build();
            let module = load(&image.data).unwrap();
            assert_eq!(module.tracks, [Some(track.to_vec()), None], "{dialect:?}");
        }
    }

    #[test]
    fn envelope_sentinel() {
        let f = features(TrackDialect::V1, InstrumentLayout::V1, Effects::ENVELOPE);
        let env = [1, 4, 16, 2, 0xff, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 9];
        let image = ImageBuilder::new(f).envelope(env).envelope([0; 16]).build();
        let module = load(&image.data).unwrap();
        assert_eq!(module.envelopes.len(), 2);
        let points = module.envelopes[0].points;
        assert_eq!(
            points[1],
            EnvelopePoint {
                ticks_to_wait: 2,
                volume_increment: -1,
                times_to_repeat: 3
            }
        );
        assert_eq!(
            points[5],
            EnvelopePoint {
                ticks_to_wait: 9,
                volume_increment: 0,
                times_to_repeat: 0xff
            }
        );
    }

    #[test]
    fn instrument_layouts() {
        let record = [1, 40, 0x22, 0xfe, 0xff, 0xf0, 0x01, 0x00, 5, 1, 2, 0x83, 4, 0x85, 3, 2];
        let f = features(TrackDialect::V3, InstrumentLayout::V3, Effects::empty());
        let module = load(&ImageBuilder::new(f).instrument(record).build().data).unwrap();
        let v3 = module.instruments[0];
        assert_eq!(v3.volume, 40);
        assert_eq!(
            v3.effects,
            InstrumentEffects::SET_NOTE | InstrumentEffects::ARPEGGIO
        );
        assert_eq!(v3.transpose, -2);
        assert_eq!(v3.fine_tune, -16);
        assert_eq!(v3.sample_start_offset, 0x100);
        assert_eq!(v3.stop_reset_delay, 5);
        assert_eq!(v3.arpeggio, [1, 2, -125, 4]);
        assert_eq!((v3.fixed_note, v3.vibrato_number, v3.vibrato_delay), (0x85, 3, 2));

        let f = features(TrackDialect::V1, InstrumentLayout::V1, Effects::empty());
        let module = load(&ImageBuilder::new(f).instrument(record).build().data).unwrap();
        let v1 = module.instruments[0];
        assert_eq!((v1.sample, v1.envelope, v1.volume), (1, 40, 0));
        assert_eq!(v1.portamento_add, 0xff);
        assert_eq!((v1.stop_reset_delay, v1.sample2), (0x00, 5));
        assert_eq!(v1.arpeggio, [1, 2, -125, 4]);

        let f = features(TrackDialect::V2, InstrumentLayout::V2, Effects::empty());
        let module = load(&ImageBuilder::new(f).instrument(record).build().data).unwrap();
        assert_eq!(module.instruments[0].volume, 40);
    }

    #[test]
    fn sample_lengths() {
        for effects in [Effects::empty(), Effects::SEPARATE_SAMPLE_INFO] {
            let f = features(TrackDialect::V4, InstrumentLayout::V3, effects);
            let image = ImageBuilder::new(f)
                .sample(vec![1; 64], 0, 1)
                .sample(Vec::new(), 0, 0)
                .sample(vec![-1; 32], 8, 4)
                .build();
            let module = load(&image.data).unwrap();
            assert_eq!(module.samples.len(), NUM_SAMPLES);
            let infos: Vec<_> = module.sample_infos().collect();
            assert_eq!(infos[0].length, 64);
            assert_eq!(infos[0].data, &[1; 64]);
            assert_eq!(infos[0].looping, None);
            assert_eq!(module.samples[1].loop_length, 1);
            assert!(module.samples[1].data.is_empty());
            assert_eq!(infos[2].data, &[-1; 32]);
            assert_eq!(
                infos[2].looping,
                Some(crate::module::SampleLoop {
                    start: 8,
                    length: 8
                })
            );
            assert_eq!(module.samples[26], Sample {
                loop_length: 1,
                ..Sample::default()
            });
        }
    }

    #[test]
    fn truncated_sample() {
        let f = features(TrackDialect::V4, InstrumentLayout::V3, Effects::empty());
        let image = ImageBuilder::new(f)
            .gap(crate::scan::MIN_MODULE_SIZE)
            .sample(vec![7; 200], 0, 1)
            .build();
        let mut data = image.data;
        data.truncate(image.offsets.sample_data + 100);
        assert_eq!(
            load(&data).unwrap_err(),
            LoadError::Truncated(Section::Samples)
        );
    }

    #[test]
    fn decreasing_sample_offsets() {
        let f = features(TrackDialect::V4, InstrumentLayout::V3, Effects::empty());
        let image = ImageBuilder::new(f).sample(vec![7; 16], 0, 1).build();
        let mut data = image.data;
        // Second start offset before the first
        let at = image.offsets.sample_start_offsets + 4;
        data[at..at + 4].copy_from_slice(&0u32.to_be_bytes());
        let at = image.offsets.sample_start_offsets;
        data[at..at + 4].copy_from_slice(&4u32.to_be_bytes());
        assert_eq!(
            load(&data).unwrap_err(),
            LoadError::Malformed(Section::Samples)
        );
    }
}
