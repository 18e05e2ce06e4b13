//! Parameter memory of the tone generator.
//!
//! Three byte memories addressed the way GS SysEx addresses them: a system
//! block, a patch block per MIDI port (patch common, sixteen part blocks and
//! sixteen controller blocks) and two drum maps per port. Writes that feed
//! derived state (effect macros, live controller values, controller depths)
//! update that state immediately, so readers never see a stale matrix.

pub mod params;
pub mod sysex;
pub mod tables;

use std::f64::consts::LN_2;

use log::debug;

use crate::engine::dsp::interpolation::Interpolation;
use crate::engine::rom::control_rom::{ControlRom, SynthGen, NONE_U8};

pub use params::*;
pub use sysex::{SysExEvent, SysExTarget};
use tables::*;

pub struct Settings {
  generation: SynthGen,
  ports: usize,
  system: [u8; SYSTEM_SIZE],
  patch: Vec<u8>,
  drum: Vec<u8>,
  matrix: Vec<[i32; DESTINATIONS]>,
  bend_factor: Vec<f32>,
  drum_set_index: Vec<u8>,
  gm_mode: bool,
  mt32_mode: bool,
}

impl Settings {
  pub fn new(generation: SynthGen) -> Self {
    let ports = generation.parts() / 16;
    let parts = ports * 16;
    let mut s = Self {
      generation,
      ports,
      system: [0; SYSTEM_SIZE],
      patch: vec![0; ports * PATCH_SIZE],
      drum: vec![0; ports * DRUM_MAPS * DRUM_MAP_SIZE],
      matrix: vec![[0; DESTINATIONS]; parts],
      bend_factor: vec![1.0; parts],
      drum_set_index: vec![0; ports * DRUM_MAPS],
      gm_mode: false,
      mt32_mode: false,
    };
    s.system[SystemParam::RxSysEx.addr()] = 1;
    s.system[SystemParam::RxGsReset.addr()] = 1;
    s.system[SystemParam::DeviceId.addr()] = 0x10;
    s.system[SystemParam::RxInstrumentChange.addr()] = 1;
    s.set_system_u32(SystemParam::SampleRate, 44100);
    s.system[SystemParam::Interpolation.addr()] = Interpolation::default().index();
    s.reset_defaults();
    s
  }

  pub fn generation(&self) -> SynthGen { self.generation }
  pub fn num_parts(&self) -> usize { self.ports * 16 }
  pub fn ports(&self) -> usize { self.ports }
  pub fn gm_mode(&self) -> bool { self.gm_mode }
  pub fn mt32_mode(&self) -> bool { self.mt32_mode }

  /// GS reset: power-on values for everything SysEx can reach, with both
  /// drum maps loaded from drum set 0. Engine settings (sample rate,
  /// interpolation, device ID) survive.
  pub fn reset(&mut self, rom: &ControlRom) {
    self.reset_defaults();
    for map in 0..self.ports * DRUM_MAPS {
      self.update_drum_set(map, 0, rom);
    }
  }

  fn reset_defaults(&mut self) {
    self.gm_mode = false;
    self.mt32_mode = false;
    self.system[..0x80].fill(0);
    self.set_master_tune(0x400);
    self.system[SystemParam::Volume.addr()] = 127;
    self.system[SystemParam::KeyShift.addr()] = 0x40;
    self.system[SystemParam::Pan.addr()] = 0x40;

    for port in 0..self.ports {
      let base = port * PATCH_SIZE;
      self.patch[base..base + PATCH_SIZE].fill(0);
      let name = PatchParam::PatchName.addr();
      self.patch[base + name..base + name + 16].fill(b' ');
      let vr = base + PatchParam::VoiceReserve.addr();
      self.patch[vr..vr + 16].copy_from_slice(&VOICE_RESERVE);
      self.write_patch(port, PatchParam::ReverbMacro.addr(), DEFAULT_REVERB_MACRO);
      self.write_patch(port, PatchParam::ChorusMacro.addr(), DEFAULT_CHORUS_MACRO);
      for p in 0..16 {
        self.reset_part(port * 16 + p);
      }
    }

    for map in 0..self.ports * DRUM_MAPS {
      self.drum_set_index[map] = 0;
      let base = map * DRUM_MAP_SIZE;
      self.drum[base..base + DRUM_MAP_SIZE].fill(0);
      for key in 0..128u8 {
        self.set_drum(map, DrumParam::PlayKeyNumber, key, key);
        self.set_drum(map, DrumParam::Level, key, 127);
        self.set_drum(map, DrumParam::Panpot, key, 0x40);
        self.set_drum(map, DrumParam::ReverbDepth, key, 127);
        self.set_drum(map, DrumParam::ChorusDepth, key, 127);
        self.set_drum(map, DrumParam::RxNoteOn, key, 1);
        self.set_drum(map, DrumParam::PitchCoarse, key, 0x40);
      }
    }
  }

  fn reset_part(&mut self, part: usize) {
    use PartParam::*;
    let local = part % 16;
    let base = self.part_base(part);
    self.patch[base..base + 0x100].fill(0);

    self.patch[base + RxChannel.offset()] = local as u8;
    for off in RxPitchBend.offset()..=RxSoft.offset() {
      self.patch[base + off] = 1;
    }
    let drums = local == 9;
    let defaults: &[(PartParam, u8)] = &[
      (PolyMode, 1),
      (AssignMode, if drums { 0 } else { 1 }),
      (UseForRhythm, if drums { 1 } else { 0 }),
      (PitchKeyShift, 0x40),
      (PitchOffsetFine, 0x08),
      (PartLevel, 100),
      (VelocitySenseDepth, 0x40),
      (VelocitySenseOffset, 0x40),
      (PartPanpot, 0x40),
      (KeyRangeHigh, 0x7f),
      (Cc1ControllerNumber, 0x10),
      (Cc2ControllerNumber, 0x11),
      (ReverbSendLevel, 0x28),
      (RxBankSelect, 1),
      (Expression, 127),
      (RpnMsb, 0x7f),
      (RpnLsb, 0x7f),
      (NrpnMsb, 0x7f),
      (NrpnLsb, 0x7f),
      (PitchCoarseTune, 0x40),
    ];
    for &(p, v) in defaults {
      self.patch[base + p.offset()] = v;
    }
    self.patch[base + VibratoRate.offset()..=base + VibratoDelay.offset()].fill(0x40);
    let st = base + ScaleTuning.offset();
    self.patch[st..st + 12].fill(0x40);
    self.patch[base + PitchBend.offset()] = 0x40;
    self.patch[base + PitchFineTune.offset()] = 0x40;

    let cbase = self.controller_base(part);
    for &src in SOURCES.iter() {
      for d in 0..DESTINATIONS {
        self.patch[cbase + src as usize * 0x10 + d] = BIAS[d] as u8;
      }
    }
    self.patch[cbase + controller_offset(CtrlSource::Modulation, CtrlDest::Lfo1PitchDepth)] = 0x0a;
    self.patch[cbase + controller_offset(CtrlSource::PitchBend, CtrlDest::PitchControl)] = 0x42;

    self.update_matrix(part);
    self.update_bend_factor(part);
  }

  #[inline]
  fn port_of(part: usize) -> usize { part / 16 }

  #[inline]
  fn part_base(&self, part: usize) -> usize {
    Self::port_of(part) * PATCH_SIZE + PART_BLOCK + (storage_part(part) << 8)
  }

  #[inline]
  fn controller_base(&self, part: usize) -> usize {
    Self::port_of(part) * PATCH_SIZE + CONTROLLER_BLOCK + (storage_part(part) << 8)
  }

  // ---- system ----

  pub fn system(&self, p: SystemParam) -> u8 { self.system[p.addr()] }

  pub fn set_system(&mut self, p: SystemParam, v: u8) { self.write_system(p.addr(), v); }

  pub fn write_system(&mut self, index: usize, v: u8) {
    if let Some(b) = self.system.get_mut(index) { *b = v; }
  }

  pub fn system_u32(&self, p: SystemParam) -> u32 {
    let a = p.addr();
    u32::from_be_bytes([self.system[a], self.system[a + 1], self.system[a + 2], self.system[a + 3]])
  }

  pub fn set_system_u32(&mut self, p: SystemParam, v: u32) {
    let a = p.addr();
    self.system[a..a + 4].copy_from_slice(&v.to_be_bytes());
  }

  /// Master tune from its four nibbles; 0x400 is A = 440 Hz.
  pub fn master_tune(&self) -> u16 {
    let a = SystemParam::Tune.addr();
    self.system[a..a + 4].iter().fold(0u16, |acc, &n| (acc << 4) | (n & 0x0f) as u16)
  }

  pub fn set_master_tune(&mut self, v: u16) {
    let a = SystemParam::Tune.addr();
    for i in 0..4 {
      self.system[a + i] = ((v >> (12 - 4 * i)) & 0x0f) as u8;
    }
  }

  pub fn sample_rate(&self) -> u32 { self.system_u32(SystemParam::SampleRate) }

  pub fn interpolation(&self) -> Interpolation {
    Interpolation::from_index(self.system(SystemParam::Interpolation))
  }

  pub fn set_interpolation(&mut self, mode: Interpolation) {
    self.system[SystemParam::Interpolation.addr()] = mode.index();
  }

  pub fn device_id(&self) -> u8 { self.system(SystemParam::DeviceId) }

  // ---- patch ----

  pub fn patch_param(&self, port: usize, p: PatchParam) -> u8 { self.patch[port * PATCH_SIZE + p.addr()] }

  pub fn set_patch_param(&mut self, port: usize, p: PatchParam, v: u8) { self.write_patch(port, p.addr(), v); }

  /// Voice reserve of a logical part.
  pub fn voice_reserve(&self, part: usize) -> u8 {
    self.patch[Self::port_of(part) * PATCH_SIZE + PatchParam::VoiceReserve.addr() + storage_part(part)]
  }

  /// Raw write into a port's patch memory; runs the macro and matrix hooks.
  pub fn write_patch(&mut self, port: usize, index: usize, v: u8) {
    if port >= self.ports || index >= PATCH_SIZE { return; }
    self.patch[port * PATCH_SIZE + index] = v;

    if index == PatchParam::ReverbMacro.addr() {
      if let Some(row) = REVERB_MACROS.get(v as usize) {
        let at = port * PATCH_SIZE + PatchParam::ReverbCharacter.addr();
        self.patch[at..at + row.len()].copy_from_slice(row);
      }
    } else if index == PatchParam::ChorusMacro.addr() {
      if let Some(row) = CHORUS_MACROS.get(v as usize) {
        let at = port * PATCH_SIZE + PatchParam::ChorusPreLpf.addr();
        self.patch[at..at + row.len()].copy_from_slice(row);
      }
    } else if (PART_BLOCK..CONTROLLER_BLOCK).contains(&index) {
      let part = port * 16 + logical_part((index >> 8) & 0x0f);
      let off = index & 0xff;
      match off {
        0x80 | 0x83..=0x86 => self.update_matrix(part),
        0x81 | 0x82 => {
          self.update_matrix(part);
          self.update_bend_factor(part);
        }
        _ => {}
      }
    } else if (CONTROLLER_BLOCK..CONTROLLER_BLOCK + 0x1000).contains(&index) {
      let part = port * 16 + logical_part((index >> 8) & 0x0f);
      self.update_matrix(part);
      if index & 0xff == controller_offset(CtrlSource::PitchBend, CtrlDest::PitchControl) {
        self.update_bend_factor(part);
      }
    }
  }

  pub fn part(&self, part: usize, p: PartParam) -> u8 { self.patch[self.part_base(part) + p.offset()] }

  /// Byte `i` of a multi-byte part parameter (scale tuning, tone number).
  pub fn part_at(&self, part: usize, p: PartParam, i: usize) -> u8 {
    self.patch[self.part_base(part) + p.offset() + i]
  }

  pub fn set_part(&mut self, part: usize, p: PartParam, v: u8) {
    self.set_part_at(part, p, 0, v);
  }

  pub fn set_part_at(&mut self, part: usize, p: PartParam, i: usize, v: u8) {
    if part >= self.num_parts() { return; }
    let index = PART_BLOCK + (storage_part(part) << 8) + p.offset() + i;
    self.write_patch(Self::port_of(part), index, v);
  }

  /// 14-bit MIDI value stored MSB at +0, LSB at +1.
  pub fn part_u14(&self, part: usize, p: PartParam) -> u16 {
    let a = self.part_base(part) + p.offset();
    ((self.patch[a] as u16 & 0x7f) << 7) | (self.patch[a + 1] as u16 & 0x7f)
  }

  pub fn set_part_u14(&mut self, part: usize, p: PartParam, v: u16) {
    // LSB first so the hook sees a complete value on the MSB write.
    self.set_part_at(part, p, 1, (v & 0x7f) as u8);
    self.set_part_at(part, p, 0, ((v >> 7) & 0x7f) as u8);
  }

  pub fn part_u16(&self, part: usize, p: PartParam) -> u16 {
    let a = self.part_base(part) + p.offset();
    u16::from_be_bytes([self.patch[a], self.patch[a + 1]])
  }

  pub fn set_part_u16(&mut self, part: usize, p: PartParam, v: u16) {
    let [hi, lo] = v.to_be_bytes();
    self.set_part_at(part, p, 1, lo);
    self.set_part_at(part, p, 0, hi);
  }

  /// Two nibbles combined into one byte.
  pub fn part_nib16(&self, part: usize, p: PartParam) -> u8 {
    let a = self.part_base(part) + p.offset();
    ((self.patch[a] & 0x0f) << 4) | (self.patch[a + 1] & 0x0f)
  }

  pub fn set_part_nib16(&mut self, part: usize, p: PartParam, v: u8) {
    self.set_part_at(part, p, 0, v >> 4);
    self.set_part_at(part, p, 1, v & 0x0f);
  }

  pub fn depth(&self, part: usize, src: CtrlSource, dest: CtrlDest) -> u8 {
    self.patch[self.controller_base(part) + controller_offset(src, dest)]
  }

  pub fn set_depth(&mut self, part: usize, src: CtrlSource, dest: CtrlDest, v: u8) {
    if part >= self.num_parts() { return; }
    let index = CONTROLLER_BLOCK + (storage_part(part) << 8) + controller_offset(src, dest);
    self.write_patch(Self::port_of(part), index, v);
  }

  // ---- controller matrix ----

  fn source_values(&self, part: usize) -> [i32; 6] {
    [
      self.part(part, PartParam::Modulation) as i32,
      (self.part_u14(part, PartParam::PitchBend) as i32 - 8192) >> 6,
      self.part(part, PartParam::ChannelPressure) as i32,
      self.part(part, PartParam::PolyKeyPressure) as i32,
      self.part(part, PartParam::Cc1) as i32,
      self.part(part, PartParam::Cc2) as i32,
    ]
  }

  fn update_matrix(&mut self, part: usize) {
    let values = self.source_values(part);
    let cbase = self.controller_base(part);
    let mut acc = [0i32; DESTINATIONS];
    for (d, out) in acc.iter_mut().enumerate() {
      let mut sum = 0i32;
      for (s, &v) in values.iter().enumerate() {
        // Bend on pitch is handled by the bend factor.
        if s == CtrlSource::PitchBend as usize && d == CtrlDest::PitchControl as usize { continue; }
        let depth = self.patch[cbase + s * 0x10 + d] as i32;
        sum += ((depth - BIAS[d]) * v) / SCALE[d];
      }
      let mag = ((sum.abs().min(LIMIT[d]) as i64 * GAIN[d]) >> 16) as i32;
      *out = if sum < 0 { -mag } else { mag };
    }
    self.matrix[part] = acc;
  }

  fn update_bend_factor(&mut self, part: usize) {
    let pb = self.part_u14(part, PartParam::PitchBend) as f64;
    let range = self.depth(part, CtrlSource::PitchBend, CtrlDest::PitchControl) as f64 - 64.0;
    self.bend_factor[part] = (((pb - 8192.0) / 8192.0) * range * LN_2 / 12.0).exp() as f32;
  }

  /// Summed controller modulation for `dest`: cents for pitch, cutoff and
  /// LFO pitch/filter depths, per-mille for amplitude and LFO amplitude
  /// depths, 0.01 Hz for the LFO rates.
  #[inline]
  pub fn accumulated(&self, part: usize, dest: CtrlDest) -> i32 { self.matrix[part][dest as usize] }

  #[inline]
  pub fn pitch_bend_factor(&self, part: usize) -> f32 { self.bend_factor[part] }

  // ---- drums ----

  /// Drum map index for a part, `None` for melodic parts.
  pub fn drum_map(&self, part: usize) -> Option<usize> {
    match self.part(part, PartParam::UseForRhythm) {
      0 => None,
      m => Some(Self::port_of(part) * DRUM_MAPS + ((m as usize - 1) & 1)),
    }
  }

  pub fn drum(&self, map: usize, p: DrumParam, key: u8) -> u8 {
    self.drum[(map / DRUM_MAPS) * DRUM_MAPS * DRUM_MAP_SIZE + p.addr(map % DRUM_MAPS, key)]
  }

  pub fn set_drum(&mut self, map: usize, p: DrumParam, key: u8, v: u8) {
    self.write_drum(map / DRUM_MAPS, p.addr(map % DRUM_MAPS, key), v);
  }

  pub fn write_drum(&mut self, port: usize, index: usize, v: u8) {
    let a = port * DRUM_MAPS * DRUM_MAP_SIZE + index;
    if let Some(b) = self.drum.get_mut(a) { *b = v; }
  }

  pub fn drum_set_index(&self, map: usize) -> u8 { self.drum_set_index.get(map).copied().unwrap_or(0) }

  pub fn drum_map_name(&self, map: usize) -> String {
    (0..12u8)
      .map(|i| self.drum(map, DrumParam::Name, i))
      .take_while(|&c| c != 0)
      .map(|c| c as char)
      .collect::<String>()
      .trim_end()
      .to_string()
  }

  /// Loads the drum set selected by `program` into `map`. Returns the drum
  /// set index, or `None` when the program has no drum set.
  pub fn update_drum_set(&mut self, map: usize, program: u8, rom: &ControlRom) -> Option<u8> {
    let index = rom.get_drum_sets_lut()[(program & 0x7f) as usize];
    if index == NONE_U8 { return None; }
    let ds = rom.drum_set(index)?;
    let name = ds.name.as_bytes();
    for i in 0..12u8 {
      let c = name.get(i as usize).copied().unwrap_or(b' ');
      self.set_drum(map, DrumParam::Name, i, c);
    }
    for key in 0..128u8 {
      let k = key as usize;
      self.set_drum(map, DrumParam::PlayKeyNumber, key, ds.key[k]);
      self.set_drum(map, DrumParam::Level, key, ds.volume[k]);
      self.set_drum(map, DrumParam::AssignGroup, key, ds.assign_group[k]);
      self.set_drum(map, DrumParam::Panpot, key, ds.panpot[k]);
      self.set_drum(map, DrumParam::ReverbDepth, key, ds.reverb[k]);
      self.set_drum(map, DrumParam::ChorusDepth, key, ds.chorus[k]);
      self.set_drum(map, DrumParam::RxNoteOff, key, ds.flags[k] & 0x01);
      self.set_drum(map, DrumParam::RxNoteOn, key, (ds.flags[k] >> 4) & 0x01);
      self.set_drum(map, DrumParam::PitchCoarse, key, 0x40);
    }
    if let Some(slot) = self.drum_set_index.get_mut(map) { *slot = index; }
    debug!("drum map {map}: set {index} ({})", ds.name);
    Some(index)
  }

  // ---- modes ----

  /// GM System On: NRPN and bank select are not received.
  pub fn set_gm_mode(&mut self) {
    for part in 0..self.num_parts() {
      self.set_part(part, PartParam::RxNrpn, 0);
      self.set_part(part, PartParam::RxBankSelect, 0);
    }
    self.gm_mode = true;
  }

  /// MT-32 compatible setup: the MT-32 tone bank on channels 2..9 and the
  /// MT-32 rhythm map on channel 10.
  pub fn set_map_mt32(&mut self, rom: &ControlRom) {
    for (part, mt) in MT32_PARTS.iter() {
      self.set_part_at(*part, PartParam::ToneNumber, 0, MT32_BANK);
      self.set_part_at(*part, PartParam::ToneNumber, 1, mt.program);
      self.set_part(*part, PartParam::PartPanpot, mt.pan);
      self.set_part(*part, PartParam::ReverbSendLevel, mt.reverb);
    }
    self.set_part(9, PartParam::UseForRhythm, 1);
    self.set_part_at(9, PartParam::ToneNumber, 1, MT32_DRUM_PROGRAM);
    self.update_drum_set(0, MT32_DRUM_PROGRAM, rom);
    self.mt32_mode = true;
  }

  /// Controller reset (CC#121 and MIDI unsubscribe): live values back to
  /// rest, RPN/NRPN deselected.
  pub fn reset_controllers(&mut self, part: usize) {
    use PartParam::*;
    for p in [Modulation, ChannelPressure, PolyKeyPressure, Cc1, Cc2, Hold1, Portamento, Sostenuto, Soft, ParamSelect] {
      self.set_part(part, p, 0);
    }
    self.set_part(part, Expression, 127);
    for p in [RpnMsb, RpnLsb, NrpnMsb, NrpnLsb] {
      self.set_part(part, p, 0x7f);
    }
    self.set_part_u14(part, PitchBend, 8192);
  }
}
