use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use soundcanvas::config::Config;
use soundcanvas::engine::audio::{us_to_frames, CpalOutput, PullDriver, WavDevice};
use soundcanvas::engine::rom::{ControlRom, PcmRom, SynthGen};
use soundcanvas::{Synth, SynthHandle};

#[derive(Parser)]
#[command(name = "soundcanvas")]
#[command(version, about = "Sound Canvas wavetable synthesizer", long_about = None)]
struct Cli {
    /// Control ROM dump (overrides Rom/prog)
    #[arg(long, global = true)]
    control: Option<PathBuf>,

    /// Wave ROM dumps in load order (overrides Rom/wave1..3)
    #[arg(long = "wave", global = true)]
    waves: Vec<PathBuf>,

    /// SC-55, SC-55mkII or SC-88 (overrides Rom/generation)
    #[arg(long, global = true)]
    generation: Option<String>,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct NoteArgs {
    /// Program number on channel 1
    #[arg(long, default_value_t = 0)]
    program: u8,

    #[arg(long, default_value_t = 60)]
    key: u8,

    #[arg(long, default_value_t = 100)]
    velocity: u8,

    /// How long the key is held
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a test note on the default output device
    Play {
        #[command(flatten)]
        note: NoteArgs,
    },

    /// Render a test note to a 16-bit stereo WAV file
    Render {
        /// Output .wav path
        output: PathBuf,

        #[command(flatten)]
        note: NoteArgs,

        /// Output rate (defaults to audio/sample_rate)
        #[arg(long)]
        sample_rate: Option<u32>,
    },

    /// Print control ROM information
    Info,

    /// Read a config key, or set it when a value is given (`audio/sample_rate 32000`)
    Config {
        key: String,
        value: Option<String>,
    },
}

fn generation(cli: &Cli, cfg: &Config) -> Result<SynthGen> {
    match &cli.generation {
        Some(g) => SynthGen::parse(g).with_context(|| format!("unknown generation {g:?}")),
        None => Ok(cfg.generation()?),
    }
}

fn load_control(cli: &Cli, cfg: &Config) -> Result<ControlRom> {
    let path = cli
        .control
        .clone()
        .or_else(|| (!cfg.rom.prog.is_empty()).then(|| PathBuf::from(&cfg.rom.prog)))
        .context("no control ROM: pass --control or set Rom/prog")?;
    Ok(ControlRom::load(&path, generation(cli, cfg)?)?)
}

fn load_synth(cli: &Cli, cfg: &Config) -> Result<Synth> {
    let ctrl = load_control(cli, cfg)?;
    let waves = if cli.waves.is_empty() { cfg.wave_paths() } else { cli.waves.clone() };
    if waves.is_empty() {
        bail!("no wave ROMs: pass --wave or set Rom/wave1");
    }
    let pcm = PcmRom::load(&waves, &ctrl)?;
    let mut synth = Synth::new(Arc::new(ctrl), Arc::new(pcm));
    synth.set_interpolation(cfg.interpolation());
    Ok(synth)
}

fn note_on(synth: &mut Synth, note: &NoteArgs) {
    synth.midi_input(0xc0, note.program, 0);
    synth.midi_input(0x90, note.key, note.velocity);
}

fn with_synth(handle: &SynthHandle, f: impl FnOnce(&mut Synth)) -> Result<()> {
    let mut s = handle.lock().map_err(|_| anyhow!("synth lock poisoned"))?;
    f(&mut s);
    Ok(())
}

fn play(cli: &Cli, cfg: &Config, note: &NoteArgs) -> Result<()> {
    let handle = load_synth(cli, cfg)?.into_handle();
    let rate = cfg.audio.sample_rate;
    let out = CpalOutput::open(handle.clone(), rate, us_to_frames(cfg.audio.buffer_time, rate) as u32)?;
    with_synth(&handle, |s| note_on(s, note))?;
    thread::sleep(Duration::from_secs_f32(note.seconds.max(0.0)));
    with_synth(&handle, |s| s.midi_input(0x80, note.key, 0))?;
    // Let the release tail ring out.
    thread::sleep(Duration::from_secs(1));
    info!("played key {} at {} Hz, {} ch", note.key, out.sample_rate(), out.channels());
    Ok(())
}

fn render(cli: &Cli, cfg: &Config, output: &PathBuf, note: &NoteArgs, sample_rate: Option<u32>) -> Result<()> {
    let rate = sample_rate.unwrap_or(cfg.audio.sample_rate);
    let mut synth = load_synth(cli, cfg)?;
    synth.set_audio_format(rate, 2);
    note_on(&mut synth, note);

    let frames = (note.seconds.max(0.0) * rate as f32) as usize;
    let (dev, done) = WavDevice::create(output, rate, 2, frames)?;
    let driver = PullDriver::start(synth.into_handle(), dev, us_to_frames(cfg.audio.period_time, rate))?;
    // A dropped sender means the thread ended early; stop() reports that.
    let _ = done.recv();
    let dev = driver.stop().context("audio thread failed")?;
    dev.finalize()?;
    info!("wrote {frames} frames to {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let cfg_path = match &cli.config {
        Some(p) => p.clone(),
        None => Config::path()?,
    };
    let mut cfg = Config::load_from(&cfg_path)?;

    match &cli.command {
        Commands::Play { note } => play(&cli, &cfg, note),
        Commands::Render { output, note, sample_rate } => render(&cli, &cfg, output, note, *sample_rate),
        Commands::Info => {
            let rom = load_control(&cli, &cfg)?;
            println!("{} control ROM v{} ({})", rom.generation(), rom.version(), rom.date());
            println!("{} instruments, {} drum sets, {} samples", rom.num_instruments(), rom.num_drum_sets(), rom.samples().len());
            Ok(())
        }
        Commands::Config { key, value: Some(value) } => {
            cfg.set(key, value)?;
            cfg.save_to(&cfg_path)?;
            Ok(())
        }
        Commands::Config { key, value: None } => {
            let v = cfg.get(key).with_context(|| format!("unknown key {key:?}"))?;
            println!("{v}");
            Ok(())
        }
    }
}
