//! Synthetic ROM images for unit tests: a couple of instruments playing a
//! pure sine and a one-shot, plus one drum set.

use std::f32::consts::PI;
use std::sync::Arc;

use crate::engine::modules::RenderCtx;
use crate::engine::rom::control_rom::{
  EnvelopeDef, InstPartial, DRUM_SET_SIZE, INSTRUMENT_SIZE, INST_PARTIAL_SIZE, NONE_U16, NONE_U8, PARTIAL_SIZE,
  SAMPLE_SIZE, VARIATION_ROW,
};
use crate::engine::rom::{ControlRom, PcmRom, SynthGen};
use crate::engine::settings::Settings;
use crate::engine::synth::Synth;

/// Frames per cycle of the test sine at unit step.
pub const SINE_PERIOD: usize = 32;

const SINE_LEN: u16 = 256;
const SINE_LOOP: u16 = 63;
const ONE_SHOT_LEN: u16 = 200;

/// Flat partial parameters: no pitch envelope, open filter, quick attack,
/// full sustain and a short release.
pub fn inst_partial(partial_index: u16) -> InstPartial {
  InstPartial {
    partial_index,
    lfo2_waveform: 0,
    lfo2_rate: 0x40,
    lfo2_delay: 0,
    lfo2_fade: 0,
    panpot: 0x40,
    coarse_pitch: 0x40,
    fine_pitch: 0x40,
    random_pitch: 0,
    pitch_key_flw: 0x4a,
    tvp_lfo1_depth: 0,
    tvp_lfo2_depth: 0,
    pitch_env_depth: 0,
    pitch_env: EnvelopeDef { levels: [0x40; 5], times: [0; 4] },
    tvf_cutoff: 127,
    tvf_resonance: 0,
    tvf_key_flw: 0x40,
    tvf_lfo1_depth: 0,
    tvf_lfo2_depth: 0,
    tvf_env_depth: 0,
    tvf_env: EnvelopeDef { levels: [0x40; 5], times: [0; 4] },
    volume: 127,
    tva_velocity_sens: 0x7f,
    tva_lfo1_depth: 0,
    tva_lfo2_depth: 0,
    tva_env: EnvelopeDef { levels: [0, 127, 127, 127, 0], times: [18, 18, 18, 40] },
    tva_time_key_flw: 0x40,
  }
}

fn put16(d: &mut [u8], at: usize, v: u16) { d[at..at + 2].copy_from_slice(&v.to_be_bytes()); }

fn put_name(d: &mut [u8], name: &str) { d[..name.len()].copy_from_slice(name.as_bytes()); }

fn encode_envelope(d: &mut [u8], env: &EnvelopeDef, levels_at: usize, times_at: usize) {
  d[levels_at..levels_at + 5].copy_from_slice(&env.levels);
  d[times_at..times_at + 4].copy_from_slice(&env.times);
}

fn encode_inst_partial(d: &mut [u8], ip: &InstPartial) {
  put16(d, 0, ip.partial_index);
  d[2..14].copy_from_slice(&[
    ip.lfo2_waveform, ip.lfo2_rate, ip.lfo2_delay, ip.lfo2_fade, ip.panpot, ip.coarse_pitch,
    ip.fine_pitch, ip.random_pitch, ip.pitch_key_flw, ip.tvp_lfo1_depth, ip.tvp_lfo2_depth, ip.pitch_env_depth,
  ]);
  encode_envelope(d, &ip.pitch_env, 14, 19);
  d[23..29].copy_from_slice(&[
    ip.tvf_cutoff, ip.tvf_resonance, ip.tvf_key_flw, ip.tvf_lfo1_depth, ip.tvf_lfo2_depth, ip.tvf_env_depth,
  ]);
  encode_envelope(d, &ip.tvf_env, 29, 34);
  d[38..42].copy_from_slice(&[ip.volume, ip.tva_velocity_sens, ip.tva_lfo1_depth, ip.tva_lfo2_depth]);
  encode_envelope(d, &ip.tva_env, 42, 47);
  d[51] = ip.tva_time_key_flw;
}

fn encode_instrument(d: &mut [u8], name: &str, partials: [Option<InstPartial>; 2]) {
  put_name(d, name);
  d[12] = 127;
  d[13..17].copy_from_slice(&[0, 0x40, 0, 0]);
  for (i, ip) in partials.iter().enumerate() {
    let at = 20 + i * INST_PARTIAL_SIZE;
    let slot = &mut d[at..at + INST_PARTIAL_SIZE];
    match ip {
      Some(ip) => encode_inst_partial(slot, ip),
      None => put16(slot, 0, NONE_U16),
    }
  }
}

fn encode_partial(d: &mut [u8], name: &str, breaks: &[(u8, u16)]) {
  put_name(d, name);
  for j in 0..16 {
    let (b, s) = breaks.get(j).copied().unwrap_or((0x7f, NONE_U16));
    d[12 + j] = b;
    put16(d, 28 + j * 2, s);
  }
}

fn encode_sample(d: &mut [u8], len: u16, loop_len: u16, loop_mode: u8) {
  d[0] = 127;
  put16(d, 6, len);
  put16(d, 8, loop_len);
  d[10] = loop_mode;
  d[11] = 60;
  put16(d, 12, 1024);
  put16(d, 14, 1024);
}

fn encode_drum_set(d: &mut [u8], name: &str) {
  for k in 0..128usize {
    put16(d, k * 2, 0);
    d[256 + k] = 127;
    d[256 + 128 + k] = k as u8;
    d[256 + 2 * 128 + k] = if k == 0x2a || k == 0x2c { 1 } else { 0 };
    d[256 + 3 * 128 + k] = 0x40;
    d[256 + 4 * 128 + k] = 0x28;
    d[256 + 5 * 128 + k] = 0;
    // Crash cymbal 1 ignores note-off.
    d[256 + 6 * 128 + k] = if k == 0x31 { 0x10 } else { 0x11 };
  }
  put_name(&mut d[0x480..], name);
}

/// Builds control ROM images with the generation's real layout.
///
/// Instrument 0 ("Piano 1") plays sample 0, a looped sine at key 60, up to
/// key 0x6f; instrument 1 plays sample 1, a one-shot. Bank row 0 maps every
/// program to instrument 0, the other rows are empty. Drum set 0 is
/// "STANDARD" with instrument 0 on every key.
#[derive(Clone, Debug)]
pub struct RomBuilder {
  generation: SynthGen,
  variations: Vec<(u8, u8, u16)>,
}

impl RomBuilder {
  pub fn new() -> Self { Self { generation: SynthGen::SC55, variations: Vec::new() } }

  pub fn generation(mut self, generation: SynthGen) -> Self {
    self.generation = generation;
    self
  }

  pub fn set_variation(&mut self, bank: u8, program: u8, instrument: u16) -> &mut Self {
    self.variations.push((bank, program, instrument));
    self
  }

  pub fn control_image(&self) -> Vec<u8> {
    let mut data = vec![0u8; self.generation.rom_size()];
    let lay = self.generation.layout();
    data[0x1c..0x20].copy_from_slice(b"1.21");
    data[0x30..0x3a].copy_from_slice(b"1991.03.01");

    let (off, count) = lay.instruments;
    for i in 0..count {
      let rec = &mut data[off + i * INSTRUMENT_SIZE..off + (i + 1) * INSTRUMENT_SIZE];
      match i {
        0 => encode_instrument(rec, "Piano 1", [Some(inst_partial(0)), None]),
        1 => encode_instrument(rec, "Perc", [Some(inst_partial(1)), None]),
        _ => encode_instrument(rec, "", [None, None]),
      }
    }

    let (off, count) = lay.partials;
    for i in 0..count {
      let rec = &mut data[off + i * PARTIAL_SIZE..off + (i + 1) * PARTIAL_SIZE];
      match i {
        0 => encode_partial(rec, "Sine", &[(0x6f, 0), (0x7f, NONE_U16)]),
        1 => encode_partial(rec, "Click", &[(0x7f, 1)]),
        _ => encode_partial(rec, "", &[]),
      }
    }

    let (off, _) = lay.samples;
    encode_sample(&mut data[off..off + SAMPLE_SIZE], SINE_LEN, SINE_LOOP, 0);
    encode_sample(&mut data[off + SAMPLE_SIZE..off + 2 * SAMPLE_SIZE], ONE_SHOT_LEN, 0, 2);

    let (off, rows) = lay.variations;
    let row_size = VARIATION_ROW * 2;
    for bank in 0..rows {
      for program in 0..VARIATION_ROW {
        let v = if bank == 0 { 0 } else { NONE_U16 };
        put16(&mut data, off + bank * row_size + program * 2, v);
      }
    }
    for &(bank, program, v) in &self.variations {
      put16(&mut data, off + bank as usize * row_size + program as usize * 2, v);
    }

    let lut = lay.drum_set_lut;
    data[lut..lut + 128].fill(NONE_U8);
    data[lut] = 0;

    let (off, _) = lay.drum_sets;
    encode_drum_set(&mut data[off..off + DRUM_SET_SIZE], "STANDARD");
    data
  }

  pub fn build_control(&self) -> ControlRom {
    ControlRom::from_bytes(&self.control_image(), self.generation).unwrap()
  }
}

fn sine(len: u16) -> Vec<f32> {
  (0..=len as usize).map(|i| (2.0 * PI * i as f32 / SINE_PERIOD as f32).sin()).collect()
}

/// PCM banks matching the builder's sample descriptors. Each holds
/// `sample_len + 1` points.
pub fn pcm() -> PcmRom { PcmRom::from_banks(vec![sine(SINE_LEN), sine(ONE_SHOT_LEN)]) }

pub struct Fixture {
  pub ctrl: ControlRom,
  pub pcm: PcmRom,
  pub settings: Settings,
}

impl Fixture {
  pub fn ctx(&self, sample_rate: f32) -> RenderCtx<'_> {
    RenderCtx { settings: &self.settings, ctrl_rom: &self.ctrl, pcm_rom: &self.pcm, sample_rate }
  }
}

pub fn fixture(generation: SynthGen) -> Fixture {
  let ctrl = RomBuilder::new().generation(generation).build_control();
  let mut settings = Settings::new(generation);
  settings.reset(&ctrl);
  Fixture { ctrl, pcm: pcm(), settings }
}

pub fn synth_from(builder: RomBuilder) -> Synth {
  Synth::new(Arc::new(builder.build_control()), Arc::new(pcm()))
}

pub fn synth(generation: SynthGen) -> Synth { synth_from(RomBuilder::new().generation(generation)) }
