use super::lfo::{rate_hz, Lfo};
use super::partial::Partial;
use super::RenderCtx;
use crate::engine::rom::control_rom::Instrument;
use crate::engine::settings::{CtrlDest, PartParam};

/// A sounding key: the instrument's LFO1 and up to two partials.
#[derive(Clone, Debug)]
pub struct Note {
  pub key: u8,
  pub velocity: u8,
  /// Allocation order, larger is newer.
  pub serial: u64,
  pub assign_group: u8,
  part: usize,
  lfo1: Lfo,
  base_rate: f32,
  partials: [Option<Partial>; 2],
  counter: u32,
  period: u32,
  released: bool,
  killed: bool,
  /// Note-off arrived while a pedal was holding the note.
  pub sustained: bool,
  /// Latched by the sostenuto pedal.
  pub sostenuto: bool,
}

impl Note {
  /// Returns `None` when neither partial resolves to a sample.
  pub fn new(
    ctx: &RenderCtx,
    inst: &Instrument,
    part: usize,
    key: u8,
    velocity: u8,
    drum_map: Option<usize>,
    assign_group: u8,
    serial: u64,
  ) -> Option<Self> {
    let partials = [
      Partial::new(ctx, inst, 0, part, key, velocity, drum_map),
      Partial::new(ctx, inst, 1, part, key, velocity, drum_map),
    ];
    if partials.iter().all(Option::is_none) { return None; }

    let s = ctx.settings;
    let mut lfo1 = Lfo::new(inst.lfo1_waveform, inst.lfo1_rate, inst.lfo1_delay, inst.lfo1_fade, ctx.sample_rate);
    lfo1.scale_delay(2f32.powf((s.part(part, PartParam::VibratoDelay) as f32 - 64.0) / 16.0));
    let mut note = Self {
      key,
      velocity,
      serial,
      assign_group,
      part,
      lfo1,
      base_rate: rate_hz(inst.lfo1_rate),
      partials,
      counter: 0,
      period: ((ctx.sample_rate / 128.0) as u32).max(1),
      released: false,
      killed: false,
      sustained: false,
      sostenuto: false,
    };
    note.update_rate(ctx);
    note.counter = note.period;
    Some(note)
  }

  fn update_rate(&mut self, ctx: &RenderCtx) {
    let s = ctx.settings;
    let vibrato = (s.part(self.part, PartParam::VibratoRate) as f32 - 64.0) / 64.0;
    // Part vibrato rate spans one octave either way around the tone's rate.
    let scaled = self.base_rate * 2f32.powf(vibrato);
    let ctrl = s.accumulated(self.part, CtrlDest::Lfo1Rate) as f32 / 100.0;
    self.lfo1.set_rate_offset(scaled - self.base_rate + ctrl);
  }

  /// Sums both partials for one frame. `None` once every partial has
  /// finished.
  #[inline]
  pub fn next(&mut self, ctx: &RenderCtx) -> Option<(f32, f32)> {
    if self.counter == 0 {
      self.update_rate(ctx);
      self.counter = self.period;
    }
    self.counter -= 1;
    let lfo1 = self.lfo1.next();
    let mut out = (0.0, 0.0);
    let mut alive = false;
    for slot in self.partials.iter_mut() {
      if let Some(p) = slot {
        match p.next(ctx, lfo1) {
          Some((l, r)) => {
            out.0 += l;
            out.1 += r;
            alive = true;
          }
          None => *slot = None,
        }
      }
    }
    if alive { Some(out) } else { None }
  }

  pub fn note_off(&mut self) {
    self.released = true;
    self.sustained = false;
    for p in self.partials.iter_mut().flatten() { p.note_off(); }
  }

  /// Fast release; a killed note no longer counts against polyphony.
  pub fn kill(&mut self) {
    self.released = true;
    self.killed = true;
    self.sustained = false;
    for p in self.partials.iter_mut().flatten() { p.kill(); }
  }

  pub fn released(&self) -> bool { self.released }
  pub fn killed(&self) -> bool { self.killed }

  pub fn finished(&self) -> bool { self.partials.iter().all(Option::is_none) }

  pub fn partial_count(&self) -> usize { self.partials.iter().flatten().count() }

  /// Loudest partial envelope level.
  pub fn envelope_level(&self) -> f32 {
    self.partials.iter().flatten().map(|p| p.envelope_level()).fold(0.0, f32::max)
  }

  pub fn attack_frames(&self) -> u32 {
    self.partials.iter().flatten().map(|p| p.attack_frames()).max().unwrap_or(0)
  }
}
