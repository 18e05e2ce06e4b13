// Five-stage envelope shared by TVP, TVF and TVA. Levels are in whatever unit
// the owner chooses; segments are linear in that unit.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
  Attack,
  Decay,
  SustainApproach,
  Sustain,
  Release,
  Finished,
}

/// Envelope segment time byte to milliseconds.
#[inline]
pub fn time_ms(v: u8) -> f32 { 2f32.powf(v as f32 / 9.0) }

/// Part envelope offset (NRPN attack/decay/release, 0x40 = none) as a time
/// multiplier.
#[inline]
pub fn time_scale(offset: u8) -> f32 { 2f32.powf((offset as f32 - 64.0) / 16.0) }

#[derive(Clone, Debug)]
pub struct Envelope {
  levels: [f32; 5],
  frames: [u32; 4],
  stage: Stage,
  value: f32,
  step: f32,
  remaining: u32,
  // Non-sustaining shapes end once the sustain level is reached at zero.
  end_on_silent_sustain: bool,
}

impl Envelope {
  /// `levels`: start, attack, decay, sustain, release end.
  /// `times_ms`: attack, decay, sustain approach, release.
  pub fn new(levels: [f32; 5], times_ms: [f32; 4], sample_rate: f32) -> Self {
    let mut frames = [0u32; 4];
    for (f, t) in frames.iter_mut().zip(times_ms.iter()) {
      *f = ((t * sample_rate / 1000.0).round() as u32).max(1);
    }
    let mut env = Self {
      levels,
      frames,
      stage: Stage::Attack,
      value: levels[0],
      step: 0.0,
      remaining: 0,
      end_on_silent_sustain: false,
    };
    env.enter(Stage::Attack);
    env
  }

  pub fn end_on_silent_sustain(mut self, yes: bool) -> Self {
    self.end_on_silent_sustain = yes;
    self
  }

  fn enter(&mut self, stage: Stage) {
    self.stage = stage;
    let (target, frames) = match stage {
      Stage::Attack => (self.levels[1], self.frames[0]),
      Stage::Decay => (self.levels[2], self.frames[1]),
      Stage::SustainApproach => (self.levels[3], self.frames[2]),
      Stage::Release => (self.levels[4], self.frames[3]),
      Stage::Sustain => {
        self.value = self.levels[3];
        self.step = 0.0;
        self.remaining = 0;
        if self.end_on_silent_sustain && self.value <= 0.0 {
          self.stage = Stage::Finished;
        }
        return;
      }
      Stage::Finished => {
        self.value = self.levels[4];
        self.step = 0.0;
        self.remaining = 0;
        return;
      }
    };
    self.remaining = frames;
    self.step = (target - self.value) / frames as f32;
  }

  /// Advances one frame and returns the new level.
  #[inline]
  pub fn next(&mut self) -> f32 {
    if self.remaining > 0 {
      self.value += self.step;
      self.remaining -= 1;
      if self.remaining == 0 {
        self.enter(match self.stage {
          Stage::Attack => Stage::Decay,
          Stage::Decay => Stage::SustainApproach,
          Stage::SustainApproach => Stage::Sustain,
          _ => Stage::Finished,
        });
      }
    }
    self.value
  }

  pub fn note_off(&mut self) {
    if matches!(self.stage, Stage::Release | Stage::Finished) { return; }
    self.enter(Stage::Release);
  }

  /// Forced release over `ms`, regardless of the programmed release time.
  pub fn kill(&mut self, ms: f32, sample_rate: f32) {
    if self.stage == Stage::Finished { return; }
    self.frames[3] = ((ms * sample_rate / 1000.0) as u32).max(1);
    self.enter(Stage::Release);
  }

  #[inline]
  pub fn value(&self) -> f32 { self.value }
  #[inline]
  pub fn stage(&self) -> Stage { self.stage }
  #[inline]
  pub fn finished(&self) -> bool { self.stage == Stage::Finished }

  /// Frames until the attack segment completes, from note start.
  pub fn attack_frames(&self) -> u32 { self.frames[0] }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn walks_all_stages_and_holds_sustain() {
    let mut e = Envelope::new([0.0, 1.0, 0.5, 0.25, 0.0], [1.0, 1.0, 1.0, 1.0], 1000.0);
    assert_eq!(e.stage(), Stage::Attack);
    assert_eq!(e.next(), 1.0);
    assert_eq!(e.stage(), Stage::Decay);
    assert_eq!(e.next(), 0.5);
    e.next();
    assert_eq!(e.stage(), Stage::Sustain);
    for _ in 0..100 { assert_eq!(e.next(), 0.25); }
    e.note_off();
    assert_eq!(e.stage(), Stage::Release);
    assert_eq!(e.next(), 0.0);
    assert!(e.finished());
  }

  #[test]
  fn release_starts_from_current_level() {
    let mut e = Envelope::new([0.0, 1.0, 1.0, 1.0, 0.0], [10.0, 1.0, 1.0, 4.0], 1000.0);
    for _ in 0..5 { e.next(); }
    e.note_off();
    let start = e.value();
    assert!((start - 0.5).abs() < 1e-6);
    e.next();
    assert!((e.value() - 0.375).abs() < 1e-6);
  }

  #[test]
  fn silent_sustain_finishes_when_asked() {
    let mut e = Envelope::new([0.0, 1.0, 0.5, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0], 1000.0).end_on_silent_sustain(true);
    for _ in 0..3 { e.next(); }
    assert!(e.finished());
  }

  #[test]
  fn kill_overrides_release_time() {
    let mut e = Envelope::new([1.0, 1.0, 1.0, 1.0, 0.0], [1.0, 1.0, 1.0, 5000.0], 1000.0);
    e.next();
    e.kill(2.0, 1000.0);
    e.next();
    e.next();
    assert!(e.finished());
  }

  #[test]
  fn time_curve() {
    assert!((time_ms(0) - 1.0).abs() < 1e-6);
    assert!((time_ms(9) - 2.0).abs() < 1e-5);
    assert_eq!(time_scale(0x40), 1.0);
    assert!((time_scale(0x50) - 2.0).abs() < 1e-6);
  }
}
