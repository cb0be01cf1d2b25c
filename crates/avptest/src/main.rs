//! Testing utilities for avpro

use {
    anstyle::AnsiColor,
    avpro::{
        Effects, Features, InstrumentLayout, Module, NUM_VOICES, Player, PortamentoVibrato,
        RecordingChannel, SpeedVariation, TrackDialect, VibratoTable, testing::ImageBuilder,
    },
    clap::Parser,
    std::{
        error::Error,
        fmt::Write as _,
        path::{Path, PathBuf},
        sync::Arc,
    },
};

#[derive(clap::Parser)]
enum Args {
    /// Write the per tick (period, volume) output of a module
    DumpTrace {
        module: PathBuf,
        out_path: PathBuf,
        #[command(flatten)]
        run: Run,
    },
    /// Compare the output of a module against the golden trace in the test dir
    CompareTrace {
        module: PathBuf,
        #[command(flatten)]
        run: Run,
    },
    /// Write a small generated module, for trying out the player
    DumpSynthetic { out_path: PathBuf },
    /// Check that every file is recognized and loads
    Identify { paths: Vec<PathBuf> },
}

#[derive(clap::Args)]
struct Run {
    /// Sub-song to trace
    #[arg(short = 's', long, default_value = "0")]
    sub_song: usize,
    /// Number of ticks to trace
    #[arg(short = 't', long, default_value = "3000")]
    ticks: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = std::fs::create_dir_all(basedir()) {
        eprintln!("Error: Failed to create test dir: {e}");
    }
    match args {
        Args::DumpTrace {
            module,
            out_path,
            run,
        } => std::fs::write(out_path, trace(&load(&module)?, &run)?)?,
        Args::CompareTrace { module, run } => cmp_trace(&module, &run)?,
        Args::DumpSynthetic { out_path } => std::fs::write(out_path, synthetic().build().data)?,
        Args::Identify { paths } => identify(&paths),
    }
    Ok(())
}

fn basedir() -> PathBuf {
    std::env::temp_dir().join("avpro-test")
}

fn load(path: &Path) -> Result<Arc<Module>, Box<dyn Error>> {
    let data = std::fs::read(path)?;
    Ok(Arc::new(avpro::load(&data)?))
}

/// One line per tick, with the period and volume of each voice
fn trace(module: &Arc<Module>, run: &Run) -> Result<String, Box<dyn Error>> {
    let mut player = Player::new(Arc::clone(module), run.sub_song)?;
    let mut channels: [RecordingChannel; NUM_VOICES] = Default::default();
    let mut out = String::new();
    for tick in 0..run.ticks {
        player.tick(&mut channels)?;
        write!(out, "{tick:6}")?;
        for ch in &mut channels {
            let (period, volume) = ch.last_output();
            write!(
                out,
                " {:5} {:2}",
                period.unwrap_or_default(),
                volume.unwrap_or_default()
            )?;
            ch.take();
        }
        out.push('\n');
    }
    Ok(out)
}

fn cmp_trace(path: &Path, run: &Run) -> Result<(), Box<dyn Error>> {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let golden = basedir().join(format!("{stem}.{}.trace", run.sub_song));
    if !golden.exists() {
        return Err(format!("Need golden trace at '{}'", golden.display()).into());
    }
    let clean = std::fs::read_to_string(golden)?;
    let dirty = trace(&load(path)?, run)?;
    match compare(&clean, &dirty) {
        TraceDiff::Same => report(Verdict::Pass, &format!("{stem}: trace matches")),
        TraceDiff::Length => report(Verdict::Fail, &format!("{stem}: trace length differs")),
        TraceDiff::AtTick(tick) => report(
            Verdict::Fail,
            &format!("{stem}: trace differs from tick {tick}"),
        ),
    }
    Ok(())
}

/// How a fresh trace relates to the golden one
#[derive(Debug, PartialEq, Eq)]
enum TraceDiff {
    Same,
    /// Every common tick matches, but one trace is longer
    Length,
    AtTick(usize),
}

fn compare(clean: &str, dirty: &str) -> TraceDiff {
    match clean.lines().zip(dirty.lines()).position(|(a, b)| a != b) {
        Some(tick) => TraceDiff::AtTick(tick),
        None if clean.lines().count() == dirty.lines().count() => TraceDiff::Same,
        None => TraceDiff::Length,
    }
}

fn identify(paths: &[PathBuf]) {
    for path in paths {
        let name = path.display();
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                report(Verdict::Fail, &format!("{name}: {e}"));
                continue;
            }
        };
        match avpro::identify(&data) {
            Ok(Some(det)) => match avpro::load_detected(&data, &det) {
                Ok(module) => report(
                    Verdict::Pass,
                    &format!(
                        "{name}: {:?}, {} sub-songs",
                        det.features.track,
                        module.sub_song_count()
                    ),
                ),
                Err(e) => report(Verdict::Fail, &format!("{name}: {e}")),
            },
            Ok(None) => report(Verdict::Fail, &format!("{name}: not recognized")),
            Err(e) => report(Verdict::Fail, &format!("{name}: {e}")),
        }
    }
}

/// Two voices with an arpeggiated, enveloped melody over a looping bass
fn synthetic() -> ImageBuilder {
    let features = Features {
        track: TrackDialect::V3,
        instruments: InstrumentLayout::V3,
        speed_variation: SpeedVariation::Accumulator,
        vibrato: VibratoTable::Division,
        portamento_vibrato: PortamentoVibrato::BothTogether,
        effects: Effects::ARPEGGIO | Effects::ENVELOPE,
    };
    let square: Vec<i8> = (0..32).map(|i| if i < 16 { 64 } else { -64 }).collect();
    let saw: Vec<i8> = (0..64u8).map(|i| i.cast_signed() * 2 - 64).collect();
    ImageBuilder::new(features)
        .speed_init(0x80)
        .sub_song(
            [
                vec![0x02, 0x00, 0x01, 0x01, 0xff, 0x00],
                vec![0x04, 0x02, 0xff, 0x00],
                vec![0xff, 0x00],
                vec![0xff, 0x00],
            ],
            [0; 8],
        )
        .track([0x03, 0x30, 0x05, 0x37, 0x03, 0x34, 0x05, 0x30, 0xff])
        .track([0x82, 0xc2, 0x04, 0xb0, 0x02, 0x3c, 0x06, 0x37, 0xff])
        .track([0x80, 0x01, 0x08, 0x18, 0x08, 0x1f, 0xff])
        .envelope([2, 8, 6, 1, 0xfc, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
        .instrument([0, 64, 0x20, 0, 0, 0, 0, 0, 4, 0x80, 0x84, 0x87, 0x80, 0, 1, 2])
        .instrument([1, 64, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
        .sample(square, 0, 16)
        .sample(saw, 0, 32)
}

#[derive(Clone, Copy)]
enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    const fn tag(self) -> (&'static str, AnsiColor) {
        match self {
            Self::Pass => ("PASS", AnsiColor::Green),
            Self::Fail => ("FAIL", AnsiColor::Red),
        }
    }
}

fn verdict_line(verdict: Verdict, msg: &str) -> String {
    let (tag, color) = verdict.tag();
    let style = anstyle::Style::new()
        .fg_color(Some(anstyle::Color::Ansi(color)))
        .bold();
    format!("{style}[{tag}]{style:#} {msg}")
}

fn report(verdict: Verdict, msg: &str) {
    eprintln!("{}", verdict_line(verdict, msg));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_comparison() {
        let golden = "428 64\n404 64\n381 60\n";
        assert_eq!(compare(golden, golden), TraceDiff::Same);
        assert_eq!(compare(golden, "428 64\n404 63\n381 60\n"), TraceDiff::AtTick(1));
        assert_eq!(compare(golden, "428 64\n404 64\n"), TraceDiff::Length);
        assert_eq!(compare("428 64\n", golden), TraceDiff::Length);
    }

    #[test]
    fn verdict_lines_are_tagged() {
        let line = verdict_line(Verdict::Pass, "song: trace matches");
        assert!(line.contains("[PASS]"));
        assert!(line.ends_with(" song: trace matches"));
        let line = verdict_line(Verdict::Fail, "song: not recognized");
        assert!(line.contains("[FAIL]"));
        assert!(line.starts_with('\x1b'));
    }
}
