use std::fmt;
use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const NONE_U16: u16 = 0xffff;
pub const NONE_U8: u8 = 0xff;

pub const SAMPLE_SIZE: usize = 16;
pub const PARTIAL_SIZE: usize = 60;
pub const INST_PARTIAL_SIZE: usize = 92;
pub const INSTRUMENT_SIZE: usize = 204;
pub const DRUM_SET_SIZE: usize = 0x48c;
pub const VARIATION_ROW: usize = 128;

const NAME_LEN: usize = 12;
const VERSION_OFFSET: usize = 0x1c;
const DATE_OFFSET: usize = 0x30;

/// Hardware generation. Selects the ROM layout and a handful of dialect
/// differences in the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum SynthGen {
  #[default]
  #[serde(rename = "SC-55")]
  SC55,
  #[serde(rename = "SC-55mkII")]
  SC55mk2,
  #[serde(rename = "SC-88")]
  SC88,
}

impl SynthGen {
  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().replace(['-', ' ', '_'], "").as_str() {
      "sc55" => Some(SynthGen::SC55),
      "sc55mkii" | "sc55mk2" => Some(SynthGen::SC55mk2),
      "sc88" => Some(SynthGen::SC88),
      _ => None,
    }
  }

  pub fn parts(self) -> usize {
    if self >= SynthGen::SC88 { 32 } else { 16 }
  }

  /// Total partial budget shared by all parts.
  pub fn polyphony(self) -> usize {
    match self {
      SynthGen::SC55 => 24,
      SynthGen::SC55mk2 => 28,
      SynthGen::SC88 => 64,
    }
  }

  pub fn rom_size(self) -> usize {
    match self {
      SynthGen::SC55 | SynthGen::SC55mk2 => 0x40000,
      SynthGen::SC88 => 0x80000,
    }
  }

  pub fn layout(self) -> &'static RomLayout {
    match self {
      SynthGen::SC55 => &LAYOUT_SC55,
      SynthGen::SC55mk2 => &LAYOUT_SC55MK2,
      SynthGen::SC88 => &LAYOUT_SC88,
    }
  }
}

impl fmt::Display for SynthGen {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      SynthGen::SC55 => write!(f, "SC-55"),
      SynthGen::SC55mk2 => write!(f, "SC-55mkII"),
      SynthGen::SC88 => write!(f, "SC-88"),
    }
  }
}

/// Offsets and record counts of the packed tables in a control ROM.
#[derive(Clone, Copy, Debug)]
pub struct RomLayout {
  pub instruments: (usize, usize),
  pub partials: (usize, usize),
  pub samples: (usize, usize),
  pub variations: (usize, usize),
  pub drum_set_lut: usize,
  pub drum_sets: (usize, usize),
}

const LAYOUT_SC55: RomLayout = RomLayout {
  instruments: (0x10000, 237),
  partials: (0x1bd00, 140),
  samples: (0x1dec0, 512),
  variations: (0x30000, 64),
  drum_set_lut: 0x38000,
  drum_sets: (0x38080, 14),
};

const LAYOUT_SC55MK2: RomLayout = RomLayout {
  instruments: (0x08000, 354),
  partials: (0x1a000, 265),
  samples: (0x1e000, 769),
  variations: (0x24000, 64),
  drum_set_lut: 0x28000,
  drum_sets: (0x28080, 16),
};

const LAYOUT_SC88: RomLayout = RomLayout {
  instruments: (0x10000, 654),
  partials: (0x31000, 512),
  samples: (0x39000, 1200),
  variations: (0x40000, 128),
  drum_set_lut: 0x48000,
  drum_sets: (0x48080, 24),
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
  Forward,
  ForwardRelease,
  OneShot,
}

impl LoopMode {
  pub fn from_byte(b: u8) -> Self {
    match b {
      1 => LoopMode::ForwardRelease,
      2 => LoopMode::OneShot,
      _ => LoopMode::Forward,
    }
  }

  pub fn loops(self) -> bool { self != LoopMode::OneShot }
}

/// PCM sample descriptor.
#[derive(Clone, Debug)]
pub struct Sample {
  pub volume: u8,
  /// Bank in bits 22:20, offset in bits 19:0.
  pub address: u32,
  pub attack_end: u16,
  pub sample_len: u16,
  pub loop_len: u16,
  pub loop_mode: LoopMode,
  pub root_key: u8,
  pub pitch: u16,
  pub fine_volume: u16,
}

/// Key breakpoint table mapping key ranges to samples.
#[derive(Clone, Debug)]
pub struct Partial {
  pub name: String,
  pub breaks: [u8; 16],
  pub samples: [u16; 16],
}

impl Partial {
  /// Sample index for `key`, or `None` when the matching slot is empty.
  pub fn sample_for_key(&self, key: i32) -> Option<u16> {
    for (j, &b) in self.breaks.iter().enumerate() {
      if b as i32 >= key || b == 0x7f {
        let s = self.samples[j];
        return if s == NONE_U16 { None } else { Some(s) };
      }
    }
    None
  }
}

/// Five-point envelope: start level, attack, decay and sustain targets, and
/// release end level, with four segment times.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvelopeDef {
  pub levels: [u8; 5],
  pub times: [u8; 4],
}

/// Per-partial parameter block of an instrument.
#[derive(Clone, Debug)]
pub struct InstPartial {
  pub partial_index: u16,
  pub lfo2_waveform: u8,
  pub lfo2_rate: u8,
  pub lfo2_delay: u8,
  pub lfo2_fade: u8,
  pub panpot: u8,
  pub coarse_pitch: u8,
  pub fine_pitch: u8,
  pub random_pitch: u8,
  pub pitch_key_flw: u8,
  pub tvp_lfo1_depth: u8,
  pub tvp_lfo2_depth: u8,
  pub pitch_env_depth: u8,
  pub pitch_env: EnvelopeDef,
  pub tvf_cutoff: u8,
  pub tvf_resonance: u8,
  pub tvf_key_flw: u8,
  pub tvf_lfo1_depth: u8,
  pub tvf_lfo2_depth: u8,
  pub tvf_env_depth: u8,
  pub tvf_env: EnvelopeDef,
  pub volume: u8,
  pub tva_velocity_sens: u8,
  pub tva_lfo1_depth: u8,
  pub tva_lfo2_depth: u8,
  pub tva_env: EnvelopeDef,
  pub tva_time_key_flw: u8,
}

impl InstPartial {
  pub fn is_used(&self) -> bool { self.partial_index != NONE_U16 }
}

#[derive(Clone, Debug)]
pub struct Instrument {
  pub name: String,
  pub volume: u8,
  pub lfo1_waveform: u8,
  pub lfo1_rate: u8,
  pub lfo1_delay: u8,
  pub lfo1_fade: u8,
  pub partials: [InstPartial; 2],
}

#[derive(Clone, Debug)]
pub struct DrumSet {
  pub name: String,
  pub preset: [u16; 128],
  pub volume: [u8; 128],
  pub key: [u8; 128],
  pub assign_group: [u8; 128],
  pub panpot: [u8; 128],
  pub reverb: [u8; 128],
  pub chorus: [u8; 128],
  pub flags: [u8; 128],
}

/// Decoded control ROM: instruments, partials, sample descriptors, drum sets
/// and the bank variation table.
pub struct ControlRom {
  generation: SynthGen,
  version: String,
  date: String,
  instruments: Vec<Instrument>,
  partials: Vec<Partial>,
  samples: Vec<Sample>,
  drum_sets: Vec<DrumSet>,
  variations: Vec<[u16; VARIATION_ROW]>,
  drum_sets_lut: [u8; 128],
}

#[inline]
fn be16(d: &[u8], at: usize) -> u16 { u16::from_be_bytes([d[at], d[at + 1]]) }

fn read_name(d: &[u8]) -> String {
  d.iter()
    .take_while(|&&c| c != 0)
    .map(|&c| if (0x20..0x7f).contains(&c) { c as char } else { ' ' })
    .collect::<String>()
    .trim_end()
    .to_string()
}

fn read_envelope(d: &[u8], levels_at: usize, times_at: usize) -> EnvelopeDef {
  let mut env = EnvelopeDef::default();
  env.levels.copy_from_slice(&d[levels_at..levels_at + 5]);
  env.times.copy_from_slice(&d[times_at..times_at + 4]);
  env
}

fn parse_inst_partial(d: &[u8]) -> InstPartial {
  InstPartial {
    partial_index: be16(d, 0),
    lfo2_waveform: d[2],
    lfo2_rate: d[3],
    lfo2_delay: d[4],
    lfo2_fade: d[5],
    panpot: d[6],
    coarse_pitch: d[7],
    fine_pitch: d[8],
    random_pitch: d[9],
    pitch_key_flw: d[10],
    tvp_lfo1_depth: d[11],
    tvp_lfo2_depth: d[12],
    pitch_env_depth: d[13],
    pitch_env: read_envelope(d, 14, 19),
    tvf_cutoff: d[23],
    tvf_resonance: d[24],
    tvf_key_flw: d[25],
    tvf_lfo1_depth: d[26],
    tvf_lfo2_depth: d[27],
    tvf_env_depth: d[28],
    tvf_env: read_envelope(d, 29, 34),
    volume: d[38],
    tva_velocity_sens: d[39],
    tva_lfo1_depth: d[40],
    tva_lfo2_depth: d[41],
    tva_env: read_envelope(d, 42, 47),
    tva_time_key_flw: d[51],
  }
}

fn parse_instrument(d: &[u8]) -> Instrument {
  let p0 = NAME_LEN + 8;
  Instrument {
    name: read_name(&d[..NAME_LEN]),
    volume: d[12],
    lfo1_waveform: d[13],
    lfo1_rate: d[14],
    lfo1_delay: d[15],
    lfo1_fade: d[16],
    partials: [
      parse_inst_partial(&d[p0..p0 + INST_PARTIAL_SIZE]),
      parse_inst_partial(&d[p0 + INST_PARTIAL_SIZE..p0 + 2 * INST_PARTIAL_SIZE]),
    ],
  }
}

fn parse_partial(d: &[u8]) -> Partial {
  let mut breaks = [0u8; 16];
  breaks.copy_from_slice(&d[NAME_LEN..NAME_LEN + 16]);
  let mut samples = [0u16; 16];
  for (i, s) in samples.iter_mut().enumerate() {
    *s = be16(d, NAME_LEN + 16 + i * 2);
  }
  Partial { name: read_name(&d[..NAME_LEN]), breaks, samples }
}

fn parse_sample(d: &[u8]) -> Sample {
  Sample {
    volume: d[0],
    address: u32::from_be_bytes([0, d[1], d[2], d[3]]),
    attack_end: be16(d, 4),
    sample_len: be16(d, 6),
    loop_len: be16(d, 8),
    loop_mode: LoopMode::from_byte(d[10]),
    root_key: d[11],
    pitch: be16(d, 12),
    fine_volume: be16(d, 14),
  }
}

fn parse_drum_set(d: &[u8]) -> DrumSet {
  let mut preset = [0u16; 128];
  for (k, p) in preset.iter_mut().enumerate() {
    *p = be16(d, k * 2);
  }
  let table = |n: usize| -> [u8; 128] {
    let mut t = [0u8; 128];
    t.copy_from_slice(&d[256 + n * 128..256 + (n + 1) * 128]);
    t
  };
  DrumSet {
    name: read_name(&d[0x480..0x480 + NAME_LEN]),
    preset,
    volume: table(0),
    key: table(1),
    assign_group: table(2),
    panpot: table(3),
    reverb: table(4),
    chorus: table(5),
    flags: table(6),
  }
}

impl ControlRom {
  pub fn load(path: &Path, generation: SynthGen) -> Result<Self> {
    let data = fs::read(path).map_err(|source| Error::RomIo { path: path.to_path_buf(), source })?;
    let rom = Self::from_bytes(&data, generation)?;
    info!(
      "control ROM {}: {} v{} ({}), {} instruments, {} partials, {} samples, {} drum sets",
      path.display(), generation, rom.version, rom.date,
      rom.instruments.len(), rom.partials.len(), rom.samples.len(), rom.drum_sets.len()
    );
    Ok(rom)
  }

  pub fn from_bytes(data: &[u8], generation: SynthGen) -> Result<Self> {
    if data.len() != generation.rom_size() {
      return Err(Error::RomSize { kind: "control", size: data.len() });
    }
    let lay = generation.layout();
    let records = |(offset, count): (usize, usize), size: usize| {
      (0..count).map(move |i| &data[offset + i * size..offset + (i + 1) * size])
    };

    let mut instruments: Vec<Instrument> = records(lay.instruments, INSTRUMENT_SIZE).map(parse_instrument).collect();
    let mut partials: Vec<Partial> = records(lay.partials, PARTIAL_SIZE).map(parse_partial).collect();
    let samples: Vec<Sample> = records(lay.samples, SAMPLE_SIZE).map(parse_sample).collect();
    let drum_sets: Vec<DrumSet> = records(lay.drum_sets, DRUM_SET_SIZE).map(parse_drum_set).collect();
    let mut variations: Vec<[u16; VARIATION_ROW]> = records(lay.variations, VARIATION_ROW * 2)
      .map(|row| {
        let mut r = [0u16; VARIATION_ROW];
        for (p, v) in r.iter_mut().enumerate() { *v = be16(row, p * 2); }
        r
      })
      .collect();
    let mut drum_sets_lut = [0u8; 128];
    drum_sets_lut.copy_from_slice(&data[lay.drum_set_lut..lay.drum_set_lut + 128]);

    // Dangling references would index out of bounds on the audio thread, so
    // they are cut here.
    let mut dangling = 0usize;
    for inst in &mut instruments {
      for ip in &mut inst.partials {
        if ip.is_used() && ip.partial_index as usize >= partials.len() {
          ip.partial_index = NONE_U16;
          dangling += 1;
        }
      }
    }
    for p in &mut partials {
      for s in &mut p.samples {
        if *s != NONE_U16 && *s as usize >= samples.len() {
          *s = NONE_U16;
          dangling += 1;
        }
      }
    }
    for row in &mut variations {
      for v in row.iter_mut() {
        if *v != NONE_U16 && *v as usize >= instruments.len() {
          *v = NONE_U16;
          dangling += 1;
        }
      }
    }
    for l in drum_sets_lut.iter_mut() {
      if *l != NONE_U8 && *l as usize >= drum_sets.len() {
        *l = NONE_U8;
        dangling += 1;
      }
    }
    if dangling > 0 {
      warn!("control ROM: cleared {dangling} dangling table references");
    }

    Ok(Self {
      generation,
      version: read_name(&data[VERSION_OFFSET..VERSION_OFFSET + 4]),
      date: read_name(&data[DATE_OFFSET..DATE_OFFSET + 10]),
      instruments,
      partials,
      samples,
      drum_sets,
      variations,
      drum_sets_lut,
    })
  }

  pub fn generation(&self) -> SynthGen { self.generation }
  pub fn version(&self) -> &str { &self.version }
  pub fn date(&self) -> &str { &self.date }

  pub fn instrument(&self, i: u16) -> Option<&Instrument> { self.instruments.get(i as usize) }
  pub fn partial(&self, i: u16) -> Option<&Partial> { self.partials.get(i as usize) }
  pub fn sample(&self, i: u16) -> Option<&Sample> { self.samples.get(i as usize) }
  pub fn drum_set(&self, i: u8) -> Option<&DrumSet> { self.drum_sets.get(i as usize) }

  pub fn samples(&self) -> &[Sample] { &self.samples }
  pub fn num_instruments(&self) -> usize { self.instruments.len() }
  pub fn num_drum_sets(&self) -> usize { self.drum_sets.len() }

  pub fn variation(&self, bank: u8) -> Option<&[u16; VARIATION_ROW]> { self.variations.get(bank as usize) }

  /// 128-entry table mapping a program number to a drum set index, `0xff`
  /// where no drum set exists.
  pub fn get_drum_sets_lut(&self) -> &[u8; 128] { &self.drum_sets_lut }

  /// Resolves `(bank, program)` to an instrument. Empty entries walk down
  /// toward bank 0 for regular tones (`program < 120`, `bank < 63`); the
  /// sound effect and MT-32 banks do not fall back.
  pub fn resolve_instrument(&self, bank: u8, program: u8) -> Option<u16> {
    let program = (program & 0x7f) as usize;
    let mut bank = bank as usize;
    let entry = |b: usize| self.variations.get(b).map_or(NONE_U16, |row| row[program]);
    let mut inst = entry(bank);
    if inst == NONE_U16 && program < 120 && bank < 63 {
      while inst == NONE_U16 && bank > 0 {
        bank -= 1;
        inst = entry(bank);
      }
    }
    if inst == NONE_U16 { None } else { Some(inst) }
  }
}
