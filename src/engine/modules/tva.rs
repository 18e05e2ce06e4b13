use super::envelope::{time_ms, time_scale, Envelope, Stage};
use super::volume_curve;
use crate::engine::rom::control_rom::InstPartial;
use crate::engine::settings::{CtrlDest, DrumParam, PartParam, Settings};

// Release used when a voice is cut by an assign group or stolen.
pub const KILL_MS: f32 = 2.0;

/// Velocity after the part's sense depth and offset.
#[inline]
pub fn sensed_velocity(velocity: u8, depth: u8, offset: u8) -> f32 {
  (velocity as f32 * depth as f32 / 64.0 + offset as f32 - 64.0).clamp(1.0, 127.0)
}

/// Time-variant amplifier: amplitude envelope, velocity, part level and
/// expression, tremolo and controller amplitude.
#[derive(Clone, Debug)]
pub struct Tva {
  part: usize,
  key: u8,
  drum_map: Option<usize>,
  env: Envelope,
  sr: f32,
  velocity_gain: f32,
  lfo1_steps: f32,
  lfo2_steps: f32,
  lfo1_depth: f32,
  lfo2_depth: f32,
  level: f32,
}

impl Tva {
  pub fn new(ip: &InstPartial, part: usize, key: u8, velocity: u8, drum_map: Option<usize>, settings: &Settings, sr: f32) -> Self {
    let e = &ip.tva_env;
    let follow = (ip.tva_time_key_flw as f32 - 64.0) / 64.0;
    let key_scale = 2f32.powf(-(key as f32 - 60.0) / 12.0 * follow);
    let attack = time_scale(settings.part(part, PartParam::EnvAttack));
    let decay = time_scale(settings.part(part, PartParam::EnvDecay));
    let release = time_scale(settings.part(part, PartParam::EnvRelease));
    let env = Envelope::new(
      e.levels.map(volume_curve),
      [
        time_ms(e.times[0]) * attack * key_scale,
        time_ms(e.times[1]) * decay * key_scale,
        time_ms(e.times[2]) * decay * key_scale,
        time_ms(e.times[3]) * release * key_scale,
      ],
      sr,
    )
    .end_on_silent_sustain(true);

    let v = sensed_velocity(
      velocity,
      settings.part(part, PartParam::VelocitySenseDepth),
      settings.part(part, PartParam::VelocitySenseOffset),
    ) / 127.0;
    let sens = ip.tva_velocity_sens as f32 / 127.0;

    let mut tva = Self {
      part,
      key,
      drum_map,
      env,
      sr,
      velocity_gain: 1.0 - sens * (1.0 - v * v),
      lfo1_steps: ip.tva_lfo1_depth as f32,
      lfo2_steps: ip.tva_lfo2_depth as f32,
      lfo1_depth: 0.0,
      lfo2_depth: 0.0,
      level: 1.0,
    };
    tva.update(settings);
    tva
  }

  pub fn update(&mut self, settings: &Settings) {
    let p = self.part;
    let mut level = volume_curve(settings.part(p, PartParam::PartLevel))
      * volume_curve(settings.part(p, PartParam::Expression))
      * (1.0 + settings.accumulated(p, CtrlDest::Amplitude) as f32 / 1000.0).max(0.0);
    if let Some(map) = self.drum_map {
      level *= volume_curve(settings.drum(map, DrumParam::Level, self.key));
    }
    self.level = level;
    self.lfo1_depth = (self.lfo1_steps / 127.0 + settings.accumulated(p, CtrlDest::Lfo1TvaDepth) as f32 / 1000.0).clamp(0.0, 1.0);
    self.lfo2_depth = (self.lfo2_steps / 127.0 + settings.accumulated(p, CtrlDest::Lfo2TvaDepth) as f32 / 1000.0).clamp(0.0, 1.0);
  }

  /// Advances one frame and returns the linear gain.
  #[inline]
  pub fn next(&mut self, lfo1: f32, lfo2: f32) -> f32 {
    let env = self.env.next();
    let trem = (1.0 - 0.5 * self.lfo1_depth * (1.0 - lfo1)) * (1.0 - 0.5 * self.lfo2_depth * (1.0 - lfo2));
    env * self.velocity_gain * self.level * trem
  }

  pub fn note_off(&mut self) { self.env.note_off(); }

  pub fn kill(&mut self) { self.env.kill(KILL_MS, self.sr); }

  #[inline]
  pub fn finished(&self) -> bool { self.env.finished() }

  pub fn stage(&self) -> Stage { self.env.stage() }

  /// Envelope level alone, used to rank voices for stealing.
  pub fn envelope_level(&self) -> f32 { self.env.value() }

  pub fn attack_frames(&self) -> u32 { self.env.attack_frames() }
}
