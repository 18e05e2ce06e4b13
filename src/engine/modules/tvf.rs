use super::envelope::{time_ms, time_scale, Envelope};
use crate::engine::dsp::biquad::LowPassFilter;
use crate::engine::rom::control_rom::InstPartial;
use crate::engine::settings::{CtrlDest, PartParam, Settings};

const LFO_CENTS_PER_STEP: f32 = 2400.0 / 127.0;

#[inline]
fn cutoff_hz(v: f32) -> f32 { 20.0 * 2f32.powf(v / 12.6) }

/// Time-variant filter: resonant low-pass whose cutoff follows key, envelope,
/// LFOs and controllers. Coefficients move at control rate.
#[derive(Clone, Debug)]
pub struct Tvf {
  part: usize,
  key: u8,
  filter: LowPassFilter,
  env: Envelope,
  sr: f32,
  cutoff: u8,
  resonance: u8,
  key_follow: f32,
  lfo1_steps: f32,
  lfo2_steps: f32,
  lfo1_cents: f32,
  lfo2_cents: f32,
  ctrl_cents: f32,
  base_hz: f32,
  q: f32,
}

impl Tvf {
  pub fn new(ip: &InstPartial, part: usize, key: u8, settings: &Settings, sr: f32) -> Self {
    let depth = ip.tvf_env_depth as f32;
    let lv = |l: u8| (l as f32 - 64.0) * depth;
    let e = &ip.tvf_env;
    let attack = time_scale(settings.part(part, PartParam::EnvAttack));
    let decay = time_scale(settings.part(part, PartParam::EnvDecay));
    let release = time_scale(settings.part(part, PartParam::EnvRelease));
    let env = Envelope::new(
      [lv(e.levels[0]), lv(e.levels[1]), lv(e.levels[2]), lv(e.levels[3]), lv(e.levels[4])],
      [
        time_ms(e.times[0]) * attack,
        time_ms(e.times[1]) * decay,
        time_ms(e.times[2]) * decay,
        time_ms(e.times[3]) * release,
      ],
      sr,
    );
    let mut tvf = Self {
      part,
      key,
      filter: LowPassFilter::new(sr),
      env,
      sr,
      cutoff: ip.tvf_cutoff,
      resonance: ip.tvf_resonance,
      key_follow: (ip.tvf_key_flw as f32 - 64.0) / 64.0,
      lfo1_steps: ip.tvf_lfo1_depth as f32,
      lfo2_steps: ip.tvf_lfo2_depth as f32,
      lfo1_cents: 0.0,
      lfo2_cents: 0.0,
      ctrl_cents: 0.0,
      base_hz: 0.0,
      q: 0.7,
    };
    tvf.update(settings, 0.0, 0.0);
    tvf
  }

  /// Control-rate refresh of cutoff and resonance from the part memory and
  /// the current LFO values.
  pub fn update(&mut self, settings: &Settings, lfo1: f32, lfo2: f32) {
    let p = self.part;
    let cutoff = (self.cutoff as f32 + settings.part(p, PartParam::TvfCutoff) as f32 - 64.0).clamp(0.0, 127.0);
    let res = (self.resonance as f32 + settings.part(p, PartParam::TvfResonance) as f32 - 64.0).clamp(0.0, 127.0);
    self.base_hz = cutoff_hz(cutoff);
    self.q = 0.7 + res * 8.0 / 127.0;

    self.lfo1_cents = self.lfo1_steps * LFO_CENTS_PER_STEP + settings.accumulated(p, CtrlDest::Lfo1TvfDepth) as f32;
    self.lfo2_cents = self.lfo2_steps * LFO_CENTS_PER_STEP + settings.accumulated(p, CtrlDest::Lfo2TvfDepth) as f32;
    self.ctrl_cents = settings.accumulated(p, CtrlDest::TvfCutoff) as f32;

    let cents = self.env.value()
      + (self.key as f32 - 60.0) * 100.0 * self.key_follow
      + lfo1 * self.lfo1_cents
      + lfo2 * self.lfo2_cents
      + self.ctrl_cents;
    let f = (self.base_hz * 2f32.powf(cents / 1200.0)).clamp(20.0, 0.45 * self.sr);
    self.filter.calculate_coefficients(f, self.q);
  }

  #[inline]
  pub fn apply(&mut self, x: f32) -> f32 {
    self.env.next();
    self.filter.apply(x)
  }

  pub fn note_off(&mut self) { self.env.note_off(); }

  pub fn cutoff_hz(&self) -> f32 {
    (self.base_hz * 2f32.powf((self.env.value() + self.ctrl_cents) / 1200.0)).clamp(20.0, 0.45 * self.sr)
  }

  pub fn q(&self) -> f32 { self.q }
}
