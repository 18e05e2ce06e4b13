use log::{debug, trace};

use crate::engine::modules::note::Note;
use crate::engine::modules::RenderCtx;
use crate::engine::rom::control_rom::{ControlRom, SynthGen, NONE_U16};
use crate::engine::settings::{
  CtrlDest, CtrlSource, DrumParam, PartParam, Settings, PARAM_SELECT_NRPN, PARAM_SELECT_RPN,
};

// Killed notes still fading out on top of the polyphony budget. The note list
// never grows past this, so note-on does not allocate after startup.
const KILL_MARGIN: usize = 16;
const PEDAL_ON: u8 = 64;
const BEND_RANGE_MAX: u8 = 24;

/// One frame of a part's output.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PartFrame {
  pub left: f32,
  pub right: f32,
  pub reverb: f32,
  pub chorus: f32,
}

/// One MIDI channel's tone generator slot: the bound instrument and the notes
/// currently sounding on it. Parameters live in `Settings`.
pub struct Part {
  index: usize,
  instrument: Option<u16>,
  notes: Vec<Note>,
}

impl Part {
  pub fn new(index: usize, generation: SynthGen) -> Self {
    Self { index, instrument: None, notes: Vec::with_capacity(generation.polyphony() + KILL_MARGIN) }
  }

  pub fn index(&self) -> usize { self.index }

  /// Instrument bound by the last program change, melodic parts only.
  pub fn instrument(&self) -> Option<u16> { self.instrument }

  pub fn note_count(&self) -> usize { self.notes.len() }

  pub fn notes(&self) -> &[Note] { &self.notes }

  /// Partials still playing toward the polyphony budget.
  pub fn live_partials(&self) -> usize {
    self.notes.iter().filter(|n| !n.killed()).map(Note::partial_count).sum()
  }

  /// Re-reads `ToneNumber` after a reset or a parameter write. Drum parts
  /// reload their drum map.
  pub fn bind_program(&mut self, settings: &mut Settings, rom: &ControlRom) {
    let bank = settings.part_at(self.index, PartParam::ToneNumber, 0);
    let program = settings.part_at(self.index, PartParam::ToneNumber, 1);
    match settings.drum_map(self.index) {
      Some(map) => {
        self.instrument = None;
        if settings.update_drum_set(map, program, rom).is_none() {
          debug!("part {}: program {program} has no drum set", self.index + 1);
        }
      }
      None => self.instrument = rom.resolve_instrument(bank, program),
    }
  }

  pub fn program_change(&mut self, settings: &mut Settings, rom: &ControlRom, program: u8) {
    let p = self.index;
    if settings.part(p, PartParam::RxProgramChange) == 0 { return; }
    let bank = if settings.part(p, PartParam::RxBankSelect) != 0 { settings.part(p, PartParam::BankMsb) } else { 0 };

    if let Some(map) = settings.drum_map(p) {
      if settings.update_drum_set(map, program, rom).is_some() {
        settings.set_part_at(p, PartParam::ToneNumber, 1, program);
      }
      return;
    }
    match rom.resolve_instrument(bank, program) {
      Some(inst) => {
        settings.set_part_at(p, PartParam::ToneNumber, 0, bank);
        settings.set_part_at(p, PartParam::ToneNumber, 1, program);
        self.instrument = Some(inst);
        trace!("part {}: bank {bank} program {program} -> instrument {inst}", p + 1);
      }
      None => debug!("part {}: bank {bank} program {program} is empty", p + 1),
    }
  }

  /// Starts a note. Returns the serial of the new note, or `None` when the
  /// key is filtered out or resolves to no sample.
  pub fn note_on(&mut self, ctx: &RenderCtx, key: u8, velocity: u8, serial: u64) -> Option<u64> {
    let s = ctx.settings;
    let p = self.index;
    if s.part(p, PartParam::RxNoteMessage) == 0 { return None; }
    if key < s.part(p, PartParam::KeyRangeLow) || key > s.part(p, PartParam::KeyRangeHigh) { return None; }

    let drum_map = s.drum_map(p);
    let (inst_index, assign_group) = match drum_map {
      Some(map) => {
        if s.drum(map, DrumParam::RxNoteOn, key) == 0 { return None; }
        let set = ctx.ctrl_rom.drum_set(s.drum_set_index(map))?;
        (set.preset[key as usize], s.drum(map, DrumParam::AssignGroup, key))
      }
      None => (self.instrument?, 0),
    };
    if inst_index == NONE_U16 { return None; }
    let inst = ctx.ctrl_rom.instrument(inst_index)?;

    if s.part(p, PartParam::PolyMode) == 0 {
      for n in self.notes.iter_mut().filter(|n| !n.released()) { n.kill(); }
    }
    match s.part(p, PartParam::AssignMode) {
      0 => {
        for n in self.notes.iter_mut().filter(|n| n.key == key) { n.kill(); }
      }
      1 => {
        for n in self.notes.iter_mut().filter(|n| n.key == key && !n.released()) { n.note_off(); }
      }
      _ => {}
    }
    if assign_group != 0 {
      for n in self.notes.iter_mut().filter(|n| n.assign_group == assign_group) { n.kill(); }
    }

    let note = Note::new(ctx, inst, p, key, velocity, drum_map, assign_group, serial)?;
    if self.notes.len() == self.notes.capacity() {
      // Full: drop the quietest killed note, else the oldest.
      let victim = self
        .notes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.killed())
        .min_by(|a, b| a.1.envelope_level().total_cmp(&b.1.envelope_level()))
        .map_or(0, |(i, _)| i);
      trace!("part {p}: note list full, dropping note {victim}");
      self.notes.remove(victim);
    }
    self.notes.push(note);
    Some(serial)
  }

  pub fn note_off(&mut self, settings: &Settings, key: u8) {
    let p = self.index;
    if settings.part(p, PartParam::RxNoteMessage) == 0 { return; }
    if let Some(map) = settings.drum_map(p) {
      if settings.drum(map, DrumParam::RxNoteOff, key) == 0 { return; }
    }
    let hold = settings.part(p, PartParam::Hold1) >= PEDAL_ON;
    for n in self.notes.iter_mut().filter(|n| n.key == key && !n.released()) {
      if hold || n.sostenuto {
        n.sustained = true;
      } else {
        n.note_off();
      }
    }
  }

  /// Releases every note; pedals keep holding what they hold.
  pub fn all_notes_off(&mut self, settings: &Settings) {
    let hold = settings.part(self.index, PartParam::Hold1) >= PEDAL_ON;
    for n in self.notes.iter_mut().filter(|n| !n.released()) {
      if hold || n.sostenuto { n.sustained = true; } else { n.note_off(); }
    }
  }

  pub fn all_sounds_off(&mut self) {
    for n in self.notes.iter_mut() { n.kill(); }
  }

  /// Drops every note at once, for format changes and resets.
  pub fn clear(&mut self) { self.notes.clear(); }

  /// Releases notes a pedal was holding once no pedal holds them anymore.
  fn release_sustained(&mut self, settings: &Settings) {
    let hold = settings.part(self.index, PartParam::Hold1) >= PEDAL_ON;
    for n in self.notes.iter_mut().filter(|n| n.sustained && !n.released()) {
      if !hold && !n.sostenuto { n.note_off(); }
    }
  }

  pub fn pitch_bend(&mut self, settings: &mut Settings, value: u16) {
    if settings.part(self.index, PartParam::RxPitchBend) == 0 { return; }
    settings.set_part_u14(self.index, PartParam::PitchBend, value & 0x3fff);
  }

  pub fn channel_pressure(&mut self, settings: &mut Settings, value: u8) {
    if settings.part(self.index, PartParam::RxChannelPressure) == 0 { return; }
    settings.set_part(self.index, PartParam::ChannelPressure, value);
  }

  pub fn poly_pressure(&mut self, settings: &mut Settings, _key: u8, value: u8) {
    if settings.part(self.index, PartParam::RxPolyPressure) == 0 { return; }
    settings.set_part(self.index, PartParam::PolyKeyPressure, value);
  }

  pub fn control_change(&mut self, settings: &mut Settings, controller: u8, value: u8) {
    use PartParam::*;
    let p = self.index;
    if settings.part(p, RxControlChange) == 0 { return; }
    let value = value & 0x7f;
    let rx = |settings: &Settings, sw: PartParam| settings.part(p, sw) != 0;

    match controller {
      0 => if rx(settings, RxBankSelect) { settings.set_part(p, BankMsb, value) },
      32 => if rx(settings, RxBankSelect) { settings.set_part(p, BankLsb, value) },
      1 => if rx(settings, RxModulation) { settings.set_part(p, Modulation, value) },
      6 => self.data_entry(settings, value, false),
      38 => self.data_entry(settings, value, true),
      7 => if rx(settings, RxVolume) { settings.set_part(p, PartLevel, value) },
      10 => if rx(settings, RxPanpot) { settings.set_part(p, PartPanpot, value) },
      11 => if rx(settings, RxExpression) { settings.set_part(p, Expression, value) },
      64 => if rx(settings, RxHold1) {
        settings.set_part(p, Hold1, value);
        if value < PEDAL_ON { self.release_sustained(settings); }
      },
      65 => if rx(settings, RxPortamento) { settings.set_part(p, Portamento, value) },
      66 => if rx(settings, RxSostenuto) {
        settings.set_part(p, Sostenuto, value);
        if value >= PEDAL_ON {
          for n in self.notes.iter_mut().filter(|n| !n.released()) { n.sostenuto = true; }
        } else {
          for n in self.notes.iter_mut() { n.sostenuto = false; }
          self.release_sustained(settings);
        }
      },
      67 => if rx(settings, RxSoft) { settings.set_part(p, Soft, value) },
      91 => settings.set_part(p, ReverbSendLevel, value),
      93 => settings.set_part(p, ChorusSendLevel, value),
      98 | 99 => if rx(settings, RxNrpn) {
        settings.set_part(p, if controller == 99 { NrpnMsb } else { NrpnLsb }, value);
        settings.set_part(p, ParamSelect, PARAM_SELECT_NRPN);
      },
      100 | 101 => if rx(settings, RxRpn) {
        settings.set_part(p, if controller == 101 { RpnMsb } else { RpnLsb }, value);
        settings.set_part(p, ParamSelect, PARAM_SELECT_RPN);
      },
      120 => self.all_sounds_off(),
      121 => {
        settings.reset_controllers(p);
        for n in self.notes.iter_mut() { n.sostenuto = false; }
        self.release_sustained(settings);
      }
      123..=125 => self.all_notes_off(settings),
      126 => {
        self.all_notes_off(settings);
        settings.set_part(p, PolyMode, 0);
      }
      127 => {
        self.all_notes_off(settings);
        settings.set_part(p, PolyMode, 1);
      }
      c if c == settings.part(p, Cc1ControllerNumber) => settings.set_part(p, Cc1, value),
      c if c == settings.part(p, Cc2ControllerNumber) => settings.set_part(p, Cc2, value),
      c => trace!("part {}: CC#{c} ignored", p + 1),
    }
  }

  // Only fine tune takes a data entry LSB.
  fn data_entry(&mut self, settings: &mut Settings, value: u8, lsb: bool) {
    use PartParam::*;
    let p = self.index;
    match settings.part(p, ParamSelect) {
      PARAM_SELECT_RPN => {
        match (settings.part(p, RpnMsb), settings.part(p, RpnLsb), lsb) {
          (0, 0, false) => {
            settings.set_depth(p, CtrlSource::PitchBend, CtrlDest::PitchControl, 0x40 + value.min(BEND_RANGE_MAX))
          }
          (0, 1, false) => settings.set_part_at(p, PitchFineTune, 0, value),
          (0, 1, true) => settings.set_part_at(p, PitchFineTune, 1, value),
          (0, 2, false) => settings.set_part(p, PitchCoarseTune, value.clamp(0x28, 0x58)),
          (m, l, _) => trace!("part {}: RPN {m:02X}/{l:02X} ignored", p + 1),
        }
      }
      PARAM_SELECT_NRPN if !lsb => {
        let (m, l) = (settings.part(p, NrpnMsb), settings.part(p, NrpnLsb));
        match (m, l) {
          (0x01, 0x08) => settings.set_part(p, VibratoRate, value),
          (0x01, 0x09) => settings.set_part(p, VibratoDepth, value),
          (0x01, 0x0a) => settings.set_part(p, VibratoDelay, value),
          (0x01, 0x20) => settings.set_part(p, TvfCutoff, value),
          (0x01, 0x21) => settings.set_part(p, TvfResonance, value),
          (0x01, 0x63) => settings.set_part(p, EnvAttack, value),
          (0x01, 0x64) => settings.set_part(p, EnvDecay, value),
          (0x01, 0x66) => settings.set_part(p, EnvRelease, value),
          (0x18 | 0x1a | 0x1c | 0x1d | 0x1e, key) => {
            let Some(map) = settings.drum_map(p) else { return };
            let param = match m {
              0x18 => DrumParam::PitchCoarse,
              0x1a => DrumParam::Level,
              0x1c => DrumParam::Panpot,
              0x1d => DrumParam::ReverbDepth,
              _ => DrumParam::ChorusDepth,
            };
            settings.set_drum(map, param, key, value);
          }
          _ => trace!("part {}: NRPN {m:02X}/{l:02X} ignored", p + 1),
        }
      }
      _ => {}
    }
  }

  /// Renders one frame and drops notes that have finished.
  #[inline]
  pub fn render(&mut self, ctx: &RenderCtx) -> PartFrame {
    let mut out = PartFrame::default();
    if self.notes.is_empty() { return out; }
    let s = ctx.settings;
    let p = self.index;
    let drum_map = s.drum_map(p);
    let reverb = s.part(p, PartParam::ReverbSendLevel) as f32 / 127.0;
    let chorus = s.part(p, PartParam::ChorusSendLevel) as f32 / 127.0;

    let mut finished = false;
    for n in self.notes.iter_mut() {
      match n.next(ctx) {
        Some((l, r)) => {
          out.left += l;
          out.right += r;
          let mono = 0.5 * (l + r);
          let (kr, kc) = match drum_map {
            Some(map) => (
              s.drum(map, DrumParam::ReverbDepth, n.key) as f32 / 127.0,
              s.drum(map, DrumParam::ChorusDepth, n.key) as f32 / 127.0,
            ),
            None => (1.0, 1.0),
          };
          out.reverb += mono * reverb * kr;
          out.chorus += mono * chorus * kc;
        }
        None => finished = true,
      }
    }
    if finished { self.notes.retain(|n| !n.finished()); }
    out
  }

  /// Quietest live note other than `protect`, as (index, level, serial).
  pub fn steal_candidate(&self, protect: u64) -> Option<(usize, f32, u64)> {
    self
      .notes
      .iter()
      .enumerate()
      .filter(|(_, n)| !n.killed() && n.serial != protect)
      .map(|(i, n)| (i, n.envelope_level(), n.serial))
      .min_by(|a, b| a.1.total_cmp(&b.1).then(a.2.cmp(&b.2)))
  }

  pub fn kill_note(&mut self, index: usize) {
    if let Some(n) = self.notes.get_mut(index) { n.kill(); }
  }
}
