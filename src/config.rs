use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::engine::dsp::interpolation::Interpolation;
use crate::engine::rom::SynthGen;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub system: String,
    pub device: String,
    /// Microseconds.
    pub buffer_time: u32,
    /// Microseconds.
    pub period_time: u32,
    pub sample_rate: u32,
    pub interpolation: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            system: "cpal".to_string(),
            device: "default".to_string(),
            buffer_time: 75_000,
            period_time: 25_000,
            sample_rate: 44_100,
            interpolation: "Cubic".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub system: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomConfig {
    pub prog: String,
    pub cpu: String,
    pub wave1: String,
    pub wave2: String,
    pub wave3: String,
    pub generation: String,
}

impl Default for RomConfig {
    fn default() -> Self {
        Self {
            prog: String::new(),
            cpu: String::new(),
            wave1: String::new(),
            wave2: String::new(),
            wave3: String::new(),
            generation: "SC-55".to_string(),
        }
    }
}

/// Persisted settings, addressed as `section/key` (`audio/sample_rate`,
/// `Rom/wave1`). Section names are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub midi: MidiConfig,
    #[serde(alias = "Rom")]
    pub rom: RomConfig,
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut tmp = PathBuf::from(path);
    tmp.set_extension("tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(data)?;
    f.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644));
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: expected an unsigned integer, got {value:?}")))
}

impl Config {
    /// `<config dir>/soundcanvas/config.json`
    pub fn path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or_else(|| Error::Config("could not resolve config dir".into()))?;
        Ok(base.join("soundcanvas").join("config.json"))
    }

    pub fn load() -> Result<Self> { Self::load_from(&Self::path()?) }

    /// Missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let cfg = read_json(path)?;
        debug!("config loaded from {}", path.display());
        Ok(cfg)
    }

    pub fn save(&self) -> Result<()> { self.save_to(&Self::path()?) }

    pub fn save_to(&self, path: &Path) -> Result<()> { write_json_atomic(path, self) }

    pub fn get(&self, key: &str) -> Option<String> {
        let (section, name) = key.split_once('/')?;
        let v = match (section.to_ascii_lowercase().as_str(), name) {
            ("audio", "system") => self.audio.system.clone(),
            ("audio", "device") => self.audio.device.clone(),
            ("audio", "buffer_time") => self.audio.buffer_time.to_string(),
            ("audio", "period_time") => self.audio.period_time.to_string(),
            ("audio", "sample_rate") => self.audio.sample_rate.to_string(),
            ("audio", "interpolation") => self.audio.interpolation.clone(),
            ("midi", "system") => self.midi.system.clone(),
            ("midi", "device") => self.midi.device.clone(),
            ("rom", "prog") => self.rom.prog.clone(),
            ("rom", "cpu") => self.rom.cpu.clone(),
            ("rom", "wave1") => self.rom.wave1.clone(),
            ("rom", "wave2") => self.rom.wave2.clone(),
            ("rom", "wave3") => self.rom.wave3.clone(),
            ("rom", "generation") => self.rom.generation.clone(),
            _ => return None,
        };
        Some(v)
    }

    /// Sets one key. Numbers, the interpolation mode and the generation are
    /// validated; unknown keys are an error.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let unknown = || Error::Config(format!("unknown key {key:?}"));
        let (section, name) = key.split_once('/').ok_or_else(unknown)?;
        match (section.to_ascii_lowercase().as_str(), name) {
            ("audio", "system") => self.audio.system = value.to_string(),
            ("audio", "device") => self.audio.device = value.to_string(),
            ("audio", "buffer_time") => self.audio.buffer_time = parse_u32(key, value)?,
            ("audio", "period_time") => self.audio.period_time = parse_u32(key, value)?,
            ("audio", "sample_rate") => self.audio.sample_rate = parse_u32(key, value)?,
            ("audio", "interpolation") => {
                let mode = Interpolation::parse(value)
                    .ok_or_else(|| Error::Config(format!("{key}: unknown interpolation {value:?}")))?;
                self.audio.interpolation = format!("{mode:?}");
            }
            ("midi", "system") => self.midi.system = value.to_string(),
            ("midi", "device") => self.midi.device = value.to_string(),
            ("rom", "prog") => self.rom.prog = value.to_string(),
            ("rom", "cpu") => self.rom.cpu = value.to_string(),
            ("rom", "wave1") => self.rom.wave1 = value.to_string(),
            ("rom", "wave2") => self.rom.wave2 = value.to_string(),
            ("rom", "wave3") => self.rom.wave3 = value.to_string(),
            ("rom", "generation") => {
                let gen = SynthGen::parse(value)
                    .ok_or_else(|| Error::Config(format!("{key}: unknown generation {value:?}")))?;
                self.rom.generation = gen.to_string();
            }
            _ => return Err(unknown()),
        }
        Ok(())
    }

    pub fn generation(&self) -> Result<SynthGen> {
        SynthGen::parse(&self.rom.generation)
            .ok_or_else(|| Error::Config(format!("unknown generation {:?}", self.rom.generation)))
    }

    /// Falls back to cubic for unrecognised names.
    pub fn interpolation(&self) -> Interpolation {
        Interpolation::parse(&self.audio.interpolation).unwrap_or_default()
    }

    /// Wave ROM dumps in load order, skipping empty slots.
    pub fn wave_paths(&self) -> Vec<PathBuf> {
        [&self.rom.wave1, &self.rom.wave2, &self.rom.wave3]
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }
}
