use std::f32::consts::PI;

use super::envelope::time_ms;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LfoWave {
  Sine,
  Triangle,
  Square,
  SawUp,
  SawDown,
  SampleHold,
}

impl LfoWave {
  pub fn from_index(index: u8) -> Self {
    match index {
      1 => LfoWave::Triangle,
      2 => LfoWave::Square,
      3 => LfoWave::SawUp,
      4 => LfoWave::SawDown,
      5 => LfoWave::SampleHold,
      _ => LfoWave::Sine,
    }
  }
}

/// Rate byte to Hz (0.1 Hz steps).
#[inline]
pub fn rate_hz(rate: u8) -> f32 { rate as f32 * 0.1 }

/// Bipolar low-frequency oscillator with onset delay and linear fade-in.
#[derive(Clone, Debug)]
pub struct Lfo {
  wave: LfoWave,
  base_hz: f32,
  offset_hz: f32,
  phase: f32,
  sr: f32,
  delay: u32,
  fade: u32,
  fade_pos: u32,
  held: f32,
  rng: u32,
  value: f32,
}

impl Lfo {
  pub fn new(wave: u8, rate: u8, delay: u8, fade: u8, sr: f32) -> Self {
    let frames = |v: u8| if v == 0 { 0 } else { (time_ms(v) * sr / 1000.0).round() as u32 };
    Self {
      wave: LfoWave::from_index(wave),
      base_hz: rate_hz(rate),
      offset_hz: 0.0,
      phase: 0.0,
      sr,
      delay: frames(delay),
      fade: frames(fade),
      fade_pos: 0,
      held: 0.0,
      rng: 0x1234_5678 ^ ((rate as u32) << 8 | wave as u32),
      value: 0.0,
    }
  }

  /// Additive rate change in Hz from controllers and part vibrato rate.
  pub fn set_rate_offset(&mut self, hz: f32) { self.offset_hz = hz; }

  /// Scales the remaining onset delay (part vibrato delay).
  pub fn scale_delay(&mut self, factor: f32) { self.delay = (self.delay as f32 * factor) as u32; }

  pub fn rate(&self) -> f32 { (self.base_hz + self.offset_hz).max(0.0) }

  #[inline]
  fn next_random(&mut self) -> f32 {
    let mut x = self.rng;
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    self.rng = x;
    (x as f32 / u32::MAX as f32) * 2.0 - 1.0
  }

  #[inline]
  pub fn next(&mut self) -> f32 {
    if self.delay > 0 {
      self.delay -= 1;
      self.value = 0.0;
      return 0.0;
    }
    let p = self.phase;
    let raw = match self.wave {
      LfoWave::Sine => (2.0 * PI * p).sin(),
      LfoWave::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
      LfoWave::Square => if p < 0.5 { 1.0 } else { -1.0 },
      LfoWave::SawUp => 2.0 * p - 1.0,
      LfoWave::SawDown => 1.0 - 2.0 * p,
      LfoWave::SampleHold => self.held,
    };
    self.phase += self.rate() / self.sr;
    if self.phase >= 1.0 {
      self.phase -= self.phase.floor();
      if self.wave == LfoWave::SampleHold { self.held = self.next_random(); }
    }
    let gain = if self.fade_pos < self.fade {
      self.fade_pos += 1;
      self.fade_pos as f32 / self.fade as f32
    } else {
      1.0
    };
    self.value = raw * gain;
    self.value
  }

  #[inline]
  pub fn value(&self) -> f32 { self.value }
}
