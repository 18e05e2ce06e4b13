use super::envelope::{time_ms, Envelope};
use crate::engine::rom::control_rom::InstPartial;
use crate::engine::settings::{CtrlDest, PartParam, Settings};

// Partial LFO depth bytes share the controller matrix scale: 127 -> 600 cents.
const LFO_CENTS_PER_STEP: f32 = 600.0 / 127.0;
const VIBRATO_CENTS_PER_STEP: f32 = 2.0;

/// Time-variant pitch: pitch envelope, two LFOs and controller pitch
/// modulation, as a frequency ratio.
#[derive(Clone, Debug)]
pub struct Tvp {
  part: usize,
  env: Envelope,
  lfo1_steps: f32,
  lfo2_steps: f32,
  lfo1_cents: f32,
  lfo2_cents: f32,
  ctrl_cents: f32,
}

impl Tvp {
  pub fn new(ip: &InstPartial, part: usize, settings: &Settings, sr: f32) -> Self {
    let depth = ip.pitch_env_depth as f32;
    let lv = |l: u8| (l as f32 - 64.0) * depth / 8.0;
    let e = &ip.pitch_env;
    let env = Envelope::new(
      [lv(e.levels[0]), lv(e.levels[1]), lv(e.levels[2]), lv(e.levels[3]), lv(e.levels[4])],
      e.times.map(time_ms),
      sr,
    );
    let mut tvp = Self {
      part,
      env,
      lfo1_steps: ip.tvp_lfo1_depth as f32,
      lfo2_steps: ip.tvp_lfo2_depth as f32,
      lfo1_cents: 0.0,
      lfo2_cents: 0.0,
      ctrl_cents: 0.0,
    };
    tvp.update(settings);
    tvp
  }

  pub fn update(&mut self, settings: &Settings) {
    let p = self.part;
    let vibrato = (settings.part(p, PartParam::VibratoDepth) as f32 - 64.0) * VIBRATO_CENTS_PER_STEP;
    self.lfo1_cents =
      (self.lfo1_steps * LFO_CENTS_PER_STEP + settings.accumulated(p, CtrlDest::Lfo1PitchDepth) as f32 + vibrato).max(0.0);
    self.lfo2_cents =
      (self.lfo2_steps * LFO_CENTS_PER_STEP + settings.accumulated(p, CtrlDest::Lfo2PitchDepth) as f32).max(0.0);
    self.ctrl_cents = settings.accumulated(p, CtrlDest::PitchControl) as f32;
  }

  /// Advances the pitch envelope one frame and returns the pitch ratio.
  #[inline]
  pub fn pitch(&mut self, lfo1: f32, lfo2: f32) -> f32 {
    let cents = self.env.next() + lfo1 * self.lfo1_cents + lfo2 * self.lfo2_cents + self.ctrl_cents;
    if cents == 0.0 { 1.0 } else { 2f32.powf(cents / 1200.0) }
  }

  pub fn note_off(&mut self) { self.env.note_off(); }
}
