use std::f32::consts::LN_2;

use super::lfo::Lfo;
use super::tva::Tva;
use super::tvf::Tvf;
use super::tvp::Tvp;
use super::{volume_curve, volume_curve_f, RenderCtx};
use crate::engine::dsp::interpolation::{self, Interpolation};
use crate::engine::rom::control_rom::{InstPartial, Instrument, LoopMode, SynthGen};
use crate::engine::settings::{CtrlDest, DrumParam, PartParam, Settings, SystemParam};

// Fixed output trim applied to every partial.
const PARTIAL_GAIN: f32 = 0.65;
const ROM_RATE: f32 = 32000.0;

/// Static transposition in semitones. Drums ignore the master key shift and,
/// before the mkII, the part key shift as well.
pub fn key_shift(settings: &Settings, part: usize, drum: bool) -> i32 {
  let coarse = settings.part(part, PartParam::PitchCoarseTune) as i32 - 0x40;
  let part_shift = settings.part(part, PartParam::PitchKeyShift) as i32 - 0x40;
  if !drum {
    coarse + settings.system(SystemParam::KeyShift) as i32 - 0x40 + part_shift
  } else if settings.generation() >= SynthGen::SC55mk2 {
    coarse + part_shift
  } else {
    coarse
  }
}

/// Pitch key follow factor; byte 0x4a is a follow of exactly 1.0.
#[inline]
pub fn pitch_key_follow(b: u8) -> f32 {
  if b as i32 - 0x40 != 10 { 1.0 + (b as f32 - 0x4a as f32) / 10.0 } else { 1.0 }
}

/// Sample volume byte with its fine adjustment (1024 bias, 1/1000 steps)
/// through the log curve.
#[inline]
pub fn sample_gain(volume: u8, fine_volume: u16) -> f32 {
  volume_curve_f(volume as f32 + (fine_volume as f32 - 1024.0) / 1000.0)
}

#[inline]
fn key_freq(key: u8) -> f32 { 440.0 * 2f32.powf((key as f32 - 69.0) / 12.0) }

/// One oscillator of a note: a PCM sample player with its own pitch, filter
/// and amplifier stages.
#[derive(Clone, Debug)]
pub struct Partial {
  part: usize,
  key: u8,
  drum_map: Option<usize>,
  sample_index: u16,
  end: f64,
  loop_start: f64,
  loop_period: f64,
  loop_mode: LoopMode,
  phase: f64,
  is_looping: bool,
  static_pitch: f32,
  static_volume: f32,
  key_freq: f32,
  pitch_exp: f32,
  pitch_offset: f32,
  pan_offset: f32,
  pan: f32,
  interpolation: Interpolation,
  tvp: Tvp,
  tvf: Tvf,
  tva: Tva,
  lfo2: Lfo,
  counter: u32,
  period: u32,
  finished: bool,
}

impl Partial {
  /// Builds partial `slot` of `inst` for `key`. Returns `None` when the
  /// breakpoint table has no sample for the key.
  pub fn new(
    ctx: &RenderCtx,
    inst: &Instrument,
    slot: usize,
    part: usize,
    key: u8,
    velocity: u8,
    drum_map: Option<usize>,
  ) -> Option<Self> {
    let settings = ctx.settings;
    let ip: &InstPartial = inst.partials.get(slot)?;
    if !ip.is_used() { return None; }
    let drum = drum_map.is_some();
    let shift = key_shift(settings, part, drum);

    let table = ctx.ctrl_rom.partial(ip.partial_index)?;
    let lookup_key = (key as i32 + shift).clamp(0, 127);
    let sample_index = table.sample_for_key(lookup_key)?;
    let sample = ctx.ctrl_rom.sample(sample_index)?;

    let root = sample.root_key as i32;
    let key_diff = match drum_map {
      Some(map) => {
        settings.drum(map, DrumParam::PlayKeyNumber, key) as i32 - 0x3c + shift
          + settings.drum(map, DrumParam::PitchCoarse, key) as i32 - 0x40
      }
      None => key as i32 + shift - root,
    };
    let key_diff = key_diff as f32;
    let pkf = pitch_key_follow(ip.pitch_key_flw);

    let random = if ip.random_pitch > 0 {
      let mut x = (key as u32).wrapping_mul(2654435761) ^ (velocity as u32) << 16 ^ part as u32;
      x ^= x >> 15;
      x = x.wrapping_mul(0x2c1b3c6d);
      x ^= x >> 12;
      ((x % 2001) as f32 / 1000.0 - 1.0) * ip.random_pitch as f32
    } else {
      0.0
    };

    let cents = (ip.coarse_pitch as f32 - 64.0 + key_diff * pkf + (60 - root) as f32 * (1.0 - pkf)) * 100.0
      + (ip.fine_pitch as f32 - 64.0)
      + (sample.pitch as f32 - 1024.0) / 16.0
      + random;
    let static_pitch = 2f32.powf(cents / 1200.0) * ROM_RATE / ctx.sample_rate;

    let static_volume =
      volume_curve(inst.volume) * sample_gain(sample.volume, sample.fine_volume) * volume_curve(ip.volume);

    let sample_len = sample.sample_len as f64;
    let loop_len = (sample.loop_len as f64).min(sample_len);

    let mut pan_offset = (ip.panpot as f32 - 64.0) / 127.0;
    if let Some(map) = drum_map {
      pan_offset += (settings.drum(map, DrumParam::Panpot, key) as f32 - 64.0) / 127.0;
    }

    let sr = ctx.sample_rate;
    let mut p = Self {
      part,
      key,
      drum_map,
      sample_index,
      end: sample_len + 1.0,
      loop_start: sample_len - loop_len,
      loop_period: loop_len + 1.0,
      loop_mode: sample.loop_mode,
      phase: 0.0,
      is_looping: false,
      static_pitch,
      static_volume,
      key_freq: key_freq(key),
      pitch_exp: 1.0,
      pitch_offset: 1.0,
      pan_offset,
      pan: 0.5,
      interpolation: settings.interpolation(),
      tvp: Tvp::new(ip, part, settings, sr),
      tvf: Tvf::new(ip, part, key, settings, sr),
      tva: Tva::new(ip, part, key, velocity, drum_map, settings, sr),
      lfo2: Lfo::new(ip.lfo2_waveform, ip.lfo2_rate, ip.lfo2_delay, ip.lfo2_fade, sr),
      counter: 0,
      period: ((sr / 128.0) as u32).max(1),
      finished: false,
    };
    p.update_dynamic(settings, 0.0);
    p.counter = p.period;
    Some(p)
  }

  /// Control-rate refresh: tuning, pitch offset, pan and the three stages.
  fn update_dynamic(&mut self, settings: &Settings, lfo1: f32) {
    let p = self.part;
    self.pitch_offset =
      (self.key_freq + (settings.part_nib16(p, PartParam::PitchOffsetFine) as f32 - 128.0) / 10.0) / self.key_freq;
    let tenth_cents = settings.master_tune() as f32 - 1024.0
      + (settings.part_at(p, PartParam::ScaleTuning, (self.key % 12) as usize) as f32 - 64.0) * 10.0
      + (settings.part_u16(p, PartParam::PitchFineTune) as f32 - 16384.0) / 16.384;
    self.pitch_exp = (tenth_cents * LN_2 / 12000.0).exp();

    self.pan = (0.5 + self.pan_offset + (settings.part(p, PartParam::PartPanpot) as f32 - 64.0) / 127.0).clamp(0.0, 1.0);
    self.interpolation = settings.interpolation();
    self.lfo2.set_rate_offset(settings.accumulated(p, CtrlDest::Lfo2Rate) as f32 / 100.0);

    self.tvp.update(settings);
    self.tvf.update(settings, lfo1, self.lfo2.value());
    self.tva.update(settings);
  }

  /// Maps a neighbour index onto stored data. Past the final point a loop
  /// continues from its start and a one-shot holds the final point; before
  /// the first point the tap takes the final point.
  #[inline]
  fn tap(&self, j: i64) -> usize {
    let last = self.end as i64 - 1;
    let j = if j > last {
      if self.loop_mode.loops() { self.loop_start as i64 + (j - last - 1) % self.loop_period as i64 } else { last }
    } else if j < 0 {
      last
    } else {
      j
    };
    j as usize
  }

  /// Cubic kernel neighbours `(i-1, i, i+1, i+2)` after wrapping.
  #[inline]
  fn taps(&self, i: i64) -> [usize; 4] { [self.tap(i - 1), self.tap(i), self.tap(i + 1), self.tap(i + 2)] }

  #[inline]
  fn at(data: &[f32], j: usize) -> f32 { data.get(j).copied().unwrap_or(0.0) }

  #[inline]
  fn read(&self, data: &[f32]) -> f32 {
    let i = self.phase.floor();
    let frac = (self.phase - i) as f32;
    let i = i as i64;
    match self.interpolation {
      Interpolation::Nearest => Self::at(data, self.tap(i)),
      Interpolation::Linear => interpolation::linear(Self::at(data, self.tap(i)), Self::at(data, self.tap(i + 1)), frac),
      Interpolation::Cubic => {
        let [a, b, c, d] = self.taps(i);
        interpolation::cubic([Self::at(data, a), Self::at(data, b), Self::at(data, c), Self::at(data, d)], frac)
      }
    }
  }

  /// Moves the read position, wrapping into the loop or ending a one-shot.
  /// Returns false when the sample has run out.
  #[inline]
  fn advance(&mut self, step: f64) -> bool {
    self.phase += step;
    if self.phase >= self.end {
      if !self.loop_mode.loops() { return false; }
      while self.phase >= self.end {
        self.phase -= self.loop_period;
      }
    }
    if !self.is_looping && self.loop_mode.loops() && self.phase > self.loop_start {
      self.is_looping = true;
    }
    true
  }

  /// Renders one stereo frame. `None` once the partial has finished.
  #[inline]
  pub fn next(&mut self, ctx: &RenderCtx, lfo1: f32) -> Option<(f32, f32)> {
    if self.finished { return None; }
    if self.counter == 0 {
      self.update_dynamic(ctx.settings, lfo1);
      self.counter = self.period;
    }
    self.counter -= 1;

    let lfo2 = self.lfo2.next();
    let step = self.pitch_exp
      * self.pitch_offset
      * ctx.settings.pitch_bend_factor(self.part)
      * self.static_pitch
      * self.tvp.pitch(lfo1, lfo2);
    if !self.advance(step as f64) {
      self.finished = true;
      return None;
    }

    let s = self.read(ctx.pcm_rom.sample(self.sample_index)) * PARTIAL_GAIN * self.static_volume;
    let s = self.tvf.apply(s);
    let out = s * self.tva.next(lfo1, lfo2);
    if self.tva.finished() { self.finished = true; }
    Some((out * (1.0 - self.pan), out * self.pan))
  }

  pub fn note_off(&mut self) {
    self.tvp.note_off();
    self.tvf.note_off();
    self.tva.note_off();
  }

  /// Fast release (assign group cut, voice stealing).
  pub fn kill(&mut self) { self.tva.kill(); }

  #[inline]
  pub fn finished(&self) -> bool { self.finished }
  pub fn is_looping(&self) -> bool { self.is_looping }
  pub fn phase(&self) -> f64 { self.phase }
  pub fn envelope_level(&self) -> f32 { self.tva.envelope_level() }
  pub fn attack_frames(&self) -> u32 { self.tva.attack_frames() }
  pub fn drum_map(&self) -> Option<usize> { self.drum_map }

  /// Per-frame phase increment without the envelope or LFO contribution.
  pub fn base_step(&self, settings: &Settings) -> f32 {
    self.pitch_exp * self.pitch_offset * settings.pitch_bend_factor(self.part) * self.static_pitch
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::settings::CtrlSource;
  use crate::test_support::{fixture, SINE_PERIOD};

  #[test]
  fn key_follow_factor() {
    assert_eq!(pitch_key_follow(0x4a), 1.0);
    assert!((pitch_key_follow(0x45) - 0.5).abs() < 1e-6);
    assert_eq!(pitch_key_follow(0x40), 0.0);
  }

  #[test]
  fn drum_key_shift_depends_on_generation() {
    for (gen, expect) in [(SynthGen::SC55, 0), (SynthGen::SC55mk2, 5)] {
      let mut s = Settings::new(gen);
      s.set_part(9, PartParam::PitchKeyShift, 0x45);
      assert_eq!(key_shift(&s, 9, true), expect);
      assert_eq!(key_shift(&s, 9, false), 5);
    }
  }

  #[test]
  fn root_key_plays_at_rom_rate() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let inst = f.ctrl.instrument(0).unwrap();
    let p = Partial::new(&ctx, inst, 0, 0, 60, 127, None).unwrap();
    assert!((p.base_step(&f.settings) - 1.0).abs() < 1e-6);
    let up = Partial::new(&ctx, inst, 0, 0, 72, 127, None).unwrap();
    assert!((up.base_step(&f.settings) - 2.0).abs() < 1e-5);
  }

  #[test]
  fn loop_phase_stays_in_range() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let inst = f.ctrl.instrument(0).unwrap();
    let sample = f.ctrl.sample(0).unwrap();
    let end = sample.sample_len as f64 + 1.0;
    let loop_start = (sample.sample_len - sample.loop_len) as f64;
    for key in [30u8, 60, 84, 100, 111] {
      let mut p = Partial::new(&ctx, inst, 0, 0, key, 127, None).unwrap();
      let mut looped = false;
      for _ in 0..20_000 {
        assert!(p.next(&ctx, 0.0).is_some());
        assert!(p.phase() >= 0.0 && p.phase() < end, "phase {} for key {key}", p.phase());
        if looped { assert!(p.is_looping()); }
        if p.phase() > loop_start { looped = true; }
      }
      assert!(p.is_looping());
    }
  }

  #[test]
  fn one_shot_finishes_when_running_off_the_end() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let inst = f.ctrl.instrument(1).unwrap();
    let sample = f.ctrl.sample(1).unwrap();
    assert_eq!(sample.loop_mode, LoopMode::OneShot);
    let mut p = Partial::new(&ctx, inst, 0, 0, 60, 127, None).unwrap();
    let mut frames = 0u32;
    while p.next(&ctx, 0.0).is_some() {
      frames += 1;
      assert!(frames < 10_000);
    }
    // Step 1.0 from phase 0: the overshoot happens on frame sampleLen + 1.
    assert_eq!(frames, sample.sample_len as u32);
    assert!(p.finished());
    assert!(p.next(&ctx, 0.0).is_none());
  }

  #[test]
  fn renders_the_sine_at_unit_step() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let inst = f.ctrl.instrument(0).unwrap();
    let mut p = Partial::new(&ctx, inst, 0, 0, 60, 127, None).unwrap();
    let mut peak = 0.0f32;
    for _ in 0..(SINE_PERIOD * 40) {
      let (l, r) = p.next(&ctx, 0.0).unwrap();
      assert!((l - r).abs() < 1e-6);
      peak = peak.max(l.abs());
    }
    assert!(peak > 0.1 && peak < 0.5, "peak {peak}");
  }

  #[test]
  fn cubic_neighbours_wrap_at_the_loop_edges() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let sample = f.ctrl.sample(0).unwrap();
    let (len, start) = (sample.sample_len as usize, (sample.sample_len - sample.loop_len) as usize);
    let p = Partial::new(&ctx, f.ctrl.instrument(0).unwrap(), 0, 0, 60, 127, None).unwrap();
    assert_eq!(p.taps(0), [len, 0, 1, 2]);
    assert_eq!(p.taps(len as i64 - 1), [len - 2, len - 1, len, start]);
    assert_eq!(p.taps(len as i64), [len - 1, len, start, start + 1]);
    assert_eq!(p.taps(len as i64 + 1), [len, start, start + 1, start + 2]);
  }

  #[test]
  fn one_shot_neighbours_hold_the_final_point() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let len = f.ctrl.sample(1).unwrap().sample_len as usize;
    let p = Partial::new(&ctx, f.ctrl.instrument(1).unwrap(), 0, 0, 60, 127, None).unwrap();
    assert_eq!(p.taps(0), [len, 0, 1, 2]);
    assert_eq!(p.taps(len as i64), [len - 1, len, len, len]);
  }

  #[test]
  fn fine_volume_moves_along_the_log_curve() {
    assert_eq!(sample_gain(100, 1024), volume_curve(100));
    let half_step = 0.1 * 2f32.powf(127.5 / 36.7111) - 0.1;
    assert!((sample_gain(127, 1524) - half_step).abs() < 1e-6);
    assert!(sample_gain(127, 524) < volume_curve(127));
  }

  #[test]
  fn modulation_speeds_up_lfo2() {
    let mut f = fixture(SynthGen::SC55);
    let mut p = {
      let ctx = f.ctx(32000.0);
      Partial::new(&ctx, f.ctrl.instrument(0).unwrap(), 0, 0, 60, 127, None).unwrap()
    };
    let before = p.lfo2.rate();
    f.settings.set_depth(0, CtrlSource::Modulation, CtrlDest::Lfo2Rate, 0x7f);
    f.settings.set_part(0, PartParam::Modulation, 127);
    let boost = f.settings.accumulated(0, CtrlDest::Lfo2Rate) as f32 / 100.0;
    assert!(boost > 1.0);
    let ctx = f.ctx(32000.0);
    for _ in 0..=p.period { p.next(&ctx, 0.0); }
    assert!((p.lfo2.rate() - (before + boost)).abs() < 1e-4, "{} vs {}", p.lfo2.rate(), before + boost);
  }

  #[test]
  fn missing_sample_slot_makes_no_partial() {
    let f = fixture(SynthGen::SC55);
    let ctx = f.ctx(32000.0);
    let inst = f.ctrl.instrument(0).unwrap();
    // Key 120 falls in the breakpoint slot with no sample.
    assert!(Partial::new(&ctx, inst, 0, 0, 120, 127, None).is_none());
    assert!(Partial::new(&ctx, inst, 1, 0, 60, 127, None).is_none());
  }
}
