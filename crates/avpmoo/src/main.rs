//! Command line Activision Pro player
#![forbid(unsafe_code)]

mod paula;

use {
    avpro::{
        DurationConfig, InfoLine, Module, NUM_VOICES, Player, TickStatus, VirtualChannel,
        timing::TickRate,
    },
    clap::Parser,
    crossterm::{QueueableCommand, SynchronizedUpdate, cursor, terminal},
    paula::PaulaChannel,
    std::{
        io::{ErrorKind, IsTerminal, Write as _},
        path::PathBuf,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    },
};

#[derive(clap::Parser)]
struct Args {
    /// Path to module
    path: PathBuf,
    /// Sub-song to play
    #[arg(short = 's', long, default_value = "0")]
    sub_song: usize,
    /// Output sample rate
    #[arg(short = 'r', long, default_value = "44100")]
    sample_rate: u32,
    /// Ticks per second (50 for PAL, 60 for NTSC)
    #[arg(short = 't', long, default_value = "50")]
    tick_rate: TickRate,
    /// Start playing this many seconds in
    #[arg(long)]
    start: Option<f64>,
    /// Don't loop the song
    #[arg(long)]
    no_loop: bool,
    /// Disable visualization/info dump
    #[arg(long)]
    no_vis: bool,
    /// Print what was detected and the sub-song durations, then exit
    #[arg(long)]
    info: bool,
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let vis = !args.no_vis;
    let mut stderr = std::io::stderr().lock();
    let data = match std::fs::read(&args.path) {
        Ok(data) => data,
        Err(e) => {
            writeln!(stderr, "Failed to read '{}': {e}", args.path.display())?;
            return Err(std::io::Error::other("File read error"));
        }
    };
    let module = match avpro::load(&data) {
        Ok(module) => Arc::new(module),
        Err(e) => {
            writeln!(stderr, "Failed to load '{}': {e}", args.path.display())?;
            return Err(std::io::Error::other("Module load error"));
        }
    };
    if args.info {
        return print_info(&mut stderr, &module, args.tick_rate);
    }
    let mut player = match Player::new(Arc::clone(&module), args.sub_song) {
        Ok(player) => player,
        Err(e) => {
            writeln!(stderr, "{e}")?;
            return Err(std::io::Error::other("Playback error"));
        }
    };
    let mut channels: [PaulaChannel; NUM_VOICES] = Default::default();
    if let Some(secs) = args.start {
        seek(&mut player, &mut channels, args.tick_rate, secs)?;
    }

    let mut writer = std::io::stdout().lock();
    if writer.is_terminal() {
        writeln!(
            stderr,
            "You don't want to write sample data to a terminal. Trust me."
        )?;
        return Err(std::io::Error::other(
            "Attempting to write sample data to terminal",
        ));
    }
    let stop = Arc::new(AtomicBool::new(false));
    if vis {
        stderr.queue(terminal::EnterAlternateScreen)?;
        stderr.queue(terminal::DisableLineWrap)?;
        stderr.queue(cursor::Hide)?;
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .map_err(std::io::Error::other)?;
    }

    let rate = u32::from(args.tick_rate.max(1));
    let mut remainder = 0;
    let mut buf = Vec::new();
    let mut elapsed = 0u32;
    loop {
        let status = match player.tick(&mut channels) {
            Ok(status) => status,
            Err(e) => {
                log::error!("{e}");
                break;
            }
        };
        if status == TickStatus::SongEnded && args.no_loop {
            break;
        }
        elapsed += 1;
        // Spread the rounding error over the ticks of a second
        remainder += args.sample_rate;
        let frames = remainder / rate;
        remainder %= rate;
        buf.resize(frames as usize * 2, 0i16);
        paula::mix(&mut channels, args.sample_rate, &mut buf);
        if let Err(e) = writer.write_all(bytemuck::cast_slice(&buf)) {
            match e.kind() {
                ErrorKind::BrokenPipe => break,
                _ => return Err(e),
            }
        }
        if stop.load(Ordering::Relaxed) {
            writeln!(stderr, "Gotta stop!")?;
            break;
        }
        if vis {
            stderr.sync_update(|stderr| print(stderr, &player, &channels, elapsed, rate))??;
        }
    }
    if vis {
        stderr.queue(terminal::LeaveAlternateScreen)?;
        stderr.queue(cursor::Show)?;
    }
    stderr.flush()?;
    Ok(())
}

fn seek(
    player: &mut Player,
    channels: &mut [PaulaChannel; NUM_VOICES],
    tick_rate: TickRate,
    secs: f64,
) -> std::io::Result<()> {
    let config = DurationConfig {
        tick_rate,
        ..DurationConfig::default()
    };
    let duration = avpro::sub_song_duration(player.module(), player.sub_song(), &config)
        .map_err(std::io::Error::other)?;
    let target = Duration::try_from_secs_f64(secs).map_err(std::io::Error::other)?;
    if let Some(pos) = duration.position_at(target) {
        log::info!("Seeking to {:?}", pos.time);
        player.seek(pos, channels).map_err(std::io::Error::other)?;
    }
    Ok(())
}

fn print_info(
    out: &mut std::io::StderrLock,
    module: &Arc<Module>,
    tick_rate: TickRate,
) -> std::io::Result<()> {
    let features = module.features();
    writeln!(out, "Format: {}", avpro::FORMAT_NAME)?;
    writeln!(out, "Track dialect: {:?}", features.track)?;
    writeln!(out, "Instrument layout: {:?}", features.instruments)?;
    writeln!(out, "Speed variation: {:?}", features.speed_variation)?;
    writeln!(out, "Vibrato: {:?}", features.vibrato)?;
    writeln!(out, "Portamento/vibrato: {:?}", features.portamento_vibrato)?;
    writeln!(out, "Effects: {:?}", features.effects)?;
    writeln!(
        out,
        "Tracks: {}, instruments: {}, envelopes: {}",
        module.track_count(),
        module.instruments.len(),
        module.envelopes.len()
    )?;
    let config = DurationConfig {
        tick_rate,
        ..DurationConfig::default()
    };
    for sub_song in 0..module.sub_song_count() {
        match avpro::sub_song_duration(module, sub_song, &config) {
            Ok(d) => writeln!(
                out,
                "Sub-song {sub_song}: {:.02}s ({} ticks)",
                d.duration.as_secs_f64(),
                d.ticks
            )?,
            Err(e) => writeln!(out, "Sub-song {sub_song}: {e}")?,
        }
    }
    Ok(())
}

fn print(
    stderr: &mut std::io::StderrLock,
    player: &Player,
    channels: &[PaulaChannel; NUM_VOICES],
    elapsed: u32,
    rate: u32,
) -> std::io::Result<()> {
    stderr.queue(terminal::Clear(terminal::ClearType::All))?;
    writeln!(
        stderr,
        "= {} = sub-song {}/{}",
        avpro::FORMAT_NAME,
        player.sub_song(),
        player.module().sub_song_count()
    )?;
    writeln!(stderr, "{}:{:02}", elapsed / rate / 60, elapsed / rate % 60)?;
    for line in InfoLine::ALL {
        let (desc, value) = player.info_line(line);
        writeln!(stderr, "{desc:<20}{value}")?;
    }
    writeln!(stderr)?;
    for (i, (voice, ch)) in player.voices().iter().zip(channels).enumerate() {
        let bar = if ch.is_active() {
            "#".repeat(usize::from(ch.volume().min(64)) / 2)
        } else {
            String::new()
        };
        writeln!(
            stderr,
            "{i} trk {:3} row {:3} per {:5} vol {:2} {bar}",
            voice.track_number,
            voice.track_position,
            ch.period(),
            ch.volume()
        )?;
    }
    stderr.queue(cursor::MoveTo(0, 0))?;
    Ok(())
}
