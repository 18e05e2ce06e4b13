use std::sync::{Arc, Mutex};

use dasp::Sample;
use log::{debug, info, trace, warn};

use crate::engine::dsp::interpolation::{self, Interpolation};
use crate::engine::messages::MidiMessage;
use crate::engine::modules::RenderCtx;
use crate::engine::part::Part;
use crate::engine::rom::{ControlRom, PcmRom, SynthGen};
use crate::engine::settings::{
  logical_part, PartParam, Settings, SysExEvent, SysExTarget, SystemParam, CONTROLLER_BLOCK, PART_BLOCK,
};
use crate::error::SysExError;

pub const ACTIVE_SENSING_MS: f32 = 420.0;
const ROM_RATE: f32 = 32000.0;

/// Shared handle: MIDI input and the audio producer both lock it, one event
/// or one frame at a time.
pub type SynthHandle = Arc<Mutex<Synth>>;

/// Reverb and chorus send buses of the last rendered frame, for an external
/// effect backend.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EffectSends {
  pub reverb: f32,
  pub chorus: f32,
}

pub struct Synth {
  ctrl_rom: Arc<ControlRom>,
  pcm_rom: Arc<PcmRom>,
  settings: Settings,
  parts: Vec<Part>,
  sample_rate: f32,
  channels: usize,
  serial: u64,
  sensing: bool,
  idle_frames: u32,
  sends: EffectSends,
}

impl Synth {
  pub fn new(ctrl_rom: Arc<ControlRom>, pcm_rom: Arc<PcmRom>) -> Self {
    // Kernel tables are built here, not on the audio thread.
    interpolation::warm_up();
    let generation = ctrl_rom.generation();
    let mut settings = Settings::new(generation);
    settings.reset(&ctrl_rom);
    let parts = (0..generation.parts()).map(|i| Part::new(i, generation)).collect();
    let sample_rate = settings.sample_rate() as f32;
    let mut synth = Self {
      ctrl_rom,
      pcm_rom,
      settings,
      parts,
      sample_rate,
      channels: 2,
      serial: 0,
      sensing: false,
      idle_frames: 0,
      sends: EffectSends::default(),
    };
    synth.bind_all();
    info!(
      "{} engine: {} parts, {} partials, {} Hz",
      generation, synth.parts.len(), generation.polyphony(), synth.sample_rate
    );
    synth
  }

  pub fn into_handle(self) -> SynthHandle { Arc::new(Mutex::new(self)) }

  pub fn generation(&self) -> SynthGen { self.settings.generation() }
  pub fn settings(&self) -> &Settings { &self.settings }
  pub fn part(&self, index: usize) -> Option<&Part> { self.parts.get(index) }
  pub fn sample_rate(&self) -> u32 { self.settings.sample_rate() }
  pub fn channels(&self) -> usize { self.channels }
  pub fn effect_sends(&self) -> EffectSends { self.sends }

  pub fn active_partials(&self) -> usize { self.parts.iter().map(Part::live_partials).sum() }

  /// Sets the output format. Call before starting a driver; sounding notes
  /// are dropped since their timing depends on the rate.
  pub fn set_audio_format(&mut self, sample_rate: u32, channels: usize) {
    for part in self.parts.iter_mut() { part.clear(); }
    self.settings.set_system_u32(SystemParam::SampleRate, sample_rate);
    self.sample_rate = sample_rate as f32;
    self.channels = channels.max(1);
    debug!("audio format {sample_rate} Hz, {} channels", self.channels);
  }

  pub fn set_interpolation(&mut self, mode: Interpolation) { self.settings.set_interpolation(mode); }

  fn bind_all(&mut self) {
    for part in self.parts.iter_mut() {
      part.bind_program(&mut self.settings, &self.ctrl_rom);
    }
  }

  /// GS reset: parameters to power-on values, every note dropped.
  pub fn reset(&mut self) {
    for part in self.parts.iter_mut() { part.clear(); }
    self.settings.reset(&self.ctrl_rom);
    self.bind_all();
    info!("GS reset");
  }

  pub fn set_map_mt32(&mut self) {
    for part in self.parts.iter_mut() { part.clear(); }
    self.settings.set_map_mt32(&self.ctrl_rom);
    self.bind_all();
  }

  /// The MIDI source went away: controllers back to rest, notes released.
  pub fn midi_unsubscribed(&mut self) {
    for part in self.parts.iter_mut() {
      self.settings.reset_controllers(part.index());
      part.all_notes_off(&self.settings);
    }
  }

  pub fn midi_input(&mut self, status: u8, d1: u8, d2: u8) { self.midi_input_port(0, status, d1, d2); }

  /// Channel and real-time messages arriving on MIDI port `port` (port 1
  /// feeds parts 17..32 on the SC-88).
  pub fn midi_input_port(&mut self, port: usize, status: u8, d1: u8, d2: u8) {
    self.idle_frames = 0;
    let Some(msg) = MidiMessage::parse(status, d1, d2) else {
      trace!("MIDI status {status:02X}h ignored");
      return;
    };
    match msg {
      MidiMessage::ActiveSensing => self.sensing = true,
      MidiMessage::SystemReset => self.reset(),
      MidiMessage::Realtime(_) => {}
      _ => {
        let Some(channel) = msg.channel() else { return };
        let first = port * 16;
        let last = (first + 16).min(self.parts.len());
        for i in first..last {
          if self.settings.part(i, PartParam::RxChannel) == channel {
            self.channel_message(i, msg);
          }
        }
      }
    }
  }

  fn channel_message(&mut self, i: usize, msg: MidiMessage) {
    match msg {
      MidiMessage::NoteOn { key, velocity, .. } => {
        self.serial += 1;
        let serial = self.serial;
        let ctx = RenderCtx {
          settings: &self.settings,
          ctrl_rom: &self.ctrl_rom,
          pcm_rom: &self.pcm_rom,
          sample_rate: self.sample_rate,
        };
        if self.parts[i].note_on(&ctx, key, velocity, serial).is_some() {
          self.enforce_polyphony(serial);
        }
      }
      MidiMessage::NoteOff { key, .. } => self.parts[i].note_off(&self.settings, key),
      MidiMessage::PolyPressure { key, value, .. } => self.parts[i].poly_pressure(&mut self.settings, key, value),
      MidiMessage::ControlChange { controller, value, .. } => {
        self.parts[i].control_change(&mut self.settings, controller, value)
      }
      MidiMessage::ProgramChange { program, .. } => {
        if self.settings.system(SystemParam::RxInstrumentChange) != 0 {
          self.parts[i].program_change(&mut self.settings, &self.ctrl_rom, program);
        }
      }
      MidiMessage::ChannelPressure { value, .. } => self.parts[i].channel_pressure(&mut self.settings, value),
      MidiMessage::PitchBend { value, .. } => self.parts[i].pitch_bend(&mut self.settings, value),
      _ => {}
    }
  }

  /// Kills notes until the live partial count fits the generation's budget.
  /// Parts above their voice reserve give up notes first; within that set
  /// the quietest note goes, the oldest on a tie. `protect` is the note that
  /// triggered the check.
  fn enforce_polyphony(&mut self, protect: u64) {
    let budget = self.settings.generation().polyphony();
    loop {
      if self.active_partials() <= budget { break; }
      let mut victim: Option<(usize, usize, f32, u64)> = None;
      for over_reserve_only in [true, false] {
        for (pi, part) in self.parts.iter().enumerate() {
          if over_reserve_only && part.live_partials() <= self.settings.voice_reserve(pi) as usize { continue; }
          if let Some((ni, level, serial)) = part.steal_candidate(protect) {
            let better = match victim {
              None => true,
              Some((_, _, l, s)) => level < l || (level == l && serial < s),
            };
            if better { victim = Some((pi, ni, level, serial)); }
          }
        }
        if victim.is_some() { break; }
      }
      match victim {
        Some((pi, ni, _, serial)) => {
          trace!("stealing note {serial} from part {}", pi + 1);
          self.parts[pi].kill_note(ni);
        }
        None => break,
      }
    }
  }

  /// Applies a complete SysEx frame and follows up on what it changed.
  pub fn midi_input_sysex(&mut self, frame: &[u8]) -> Result<SysExEvent, SysExError> {
    self.idle_frames = 0;
    let event = match self.settings.apply_sysex(frame) {
      Ok(ev) => ev,
      Err(e) => {
        warn!("SysEx dropped: {e}");
        return Err(e);
      }
    };
    match &event {
      SysExEvent::GsReset | SysExEvent::GmSystemOff => self.reset(),
      SysExEvent::GmSystemOn => {
        self.reset();
        self.settings.set_gm_mode();
        info!("GM system on");
      }
      SysExEvent::Written { port, target: SysExTarget::Patch, offset, len } => {
        let mut last = None;
        for index in *offset..offset + len {
          if !(PART_BLOCK..CONTROLLER_BLOCK).contains(&index) { continue; }
          let off = index & 0xff;
          let binding = off == PartParam::ToneNumber.offset()
            || off == PartParam::ToneNumber.offset() + 1
            || off == PartParam::UseForRhythm.offset();
          let part = port * 16 + logical_part((index >> 8) & 0x0f);
          if binding && last != Some(part) && part < self.parts.len() {
            self.parts[part].bind_program(&mut self.settings, &self.ctrl_rom);
            last = Some(part);
          }
        }
      }
      _ => {}
    }
    Ok(event)
  }

  fn tick_sensing(&mut self) {
    if !self.sensing { return; }
    self.idle_frames = self.idle_frames.saturating_add(1);
    if self.idle_frames as f32 >= ACTIVE_SENSING_MS * self.sample_rate / 1000.0 {
      self.sensing = false;
      for part in self.parts.iter_mut() {
        self.settings.reset_controllers(part.index());
        part.all_notes_off(&self.settings);
      }
      debug!("active sensing timed out, notes released");
    }
  }

  /// Renders one stereo frame as floats in [-1, 1] (before clipping).
  pub fn render_frame(&mut self) -> (f32, f32) {
    self.tick_sensing();
    let ctx = RenderCtx {
      settings: &self.settings,
      ctrl_rom: &self.ctrl_rom,
      pcm_rom: &self.pcm_rom,
      sample_rate: self.sample_rate,
    };
    let (mut l, mut r, mut reverb, mut chorus) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for part in self.parts.iter_mut() {
      let f = part.render(&ctx);
      l += f.left;
      r += f.right;
      reverb += f.reverb;
      chorus += f.chorus;
    }

    let gain = self.settings.system(SystemParam::Volume) as f32 / 127.0 * ROM_RATE / self.sample_rate;
    let pan = ((self.settings.system(SystemParam::Pan) as f32 - 64.0) / 63.0).clamp(-1.0, 1.0);
    self.sends = EffectSends { reverb: reverb * gain, chorus: chorus * gain };
    (l * gain * (1.0 - pan).min(1.0), r * gain * (1.0 + pan).min(1.0))
  }

  /// Fills one interleaved frame of signed 16-bit output. Mono outputs get
  /// the average; channels past the second are silent.
  pub fn get_next_sample(&mut self, out: &mut [i16]) {
    let (l, r) = self.render_frame();
    match out {
      [] => {}
      [m] => *m = to_i16(0.5 * (l + r)),
      [a, b, rest @ ..] => {
        *a = to_i16(l);
        *b = to_i16(r);
        rest.fill(0);
      }
    }
  }
}

#[inline]
fn to_i16(x: f32) -> i16 { x.clamp(-1.0, 1.0).to_sample::<i16>() }

/// Renders one frame under the lock. A poisoned lock yields silence and
/// returns false.
pub fn next_frame(synth: &SynthHandle, out: &mut [i16]) -> bool {
  match synth.lock() {
    Ok(mut s) => {
      s.get_next_sample(out);
      true
    }
    Err(_) => {
      out.fill(0);
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::settings::sysex::roland_checksum;
  use crate::test_support::{synth, synth_from, RomBuilder};

  const SR: u32 = 32000;

  fn dt1(address: u32, data: &[u8]) -> Vec<u8> {
    let a = address.to_be_bytes();
    let mut payload = vec![a[1], a[2], a[3]];
    payload.extend_from_slice(data);
    let mut f = vec![0xf0, 0x41, 0x10, 0x42, 0x12];
    f.extend_from_slice(&payload);
    f.push(roland_checksum(&payload));
    f.push(0xf7);
    f
  }

  fn energy(s: &mut Synth, frames: usize) -> f64 {
    (0..frames).map(|_| s.render_frame()).map(|(l, r)| (l * l + r * r) as f64).sum()
  }

  /// Frequency of the left channel from interpolated rising zero crossings.
  fn measure_hz(s: &mut Synth, frames: usize) -> f64 {
    let mut prev = 0.0f32;
    let (mut first, mut last, mut count) = (None, 0.0f64, 0u32);
    for i in 0..frames {
      let (l, _) = s.render_frame();
      if prev < 0.0 && l >= 0.0 {
        let t = (i - 1) as f64 + (-prev / (l - prev)) as f64;
        if first.is_none() { first = Some(t) } else { count += 1 }
        last = t;
      }
      prev = l;
    }
    count as f64 / (last - first.unwrap()) * SR as f64
  }

  #[test]
  fn middle_c_peak_is_in_range() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0x90, 0x3c, 0x7f);
    let attack = s.part(0).unwrap().notes()[0].attack_frames() as usize;
    let mut frame = [0i16; 2];
    for _ in 0..attack { s.get_next_sample(&mut frame); }
    let mut peak = 0i32;
    for _ in 0..(SR as usize / 100) {
      s.get_next_sample(&mut frame);
      peak = peak.max((frame[0] as i32).abs()).max((frame[1] as i32).abs());
    }
    assert!(peak > (0.1 * i16::MAX as f32) as i32, "peak {peak}");
    assert!(peak < (0.9 * i16::MAX as f32) as i32, "peak {peak}");
  }

  fn drum_energy(key: u8, send_off: bool) -> f64 {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0x99, key, 0x64);
    energy(&mut s, 160);
    if send_off { s.midi_input(0x89, key, 0); }
    energy(&mut s, SR as usize / 5)
  }

  #[test]
  fn crash_ignores_note_off() {
    let held = drum_energy(0x31, false);
    assert!(held > 0.0);
    assert!(drum_energy(0x31, true) >= 0.9 * held);
    // A key that does receive note-off decays.
    assert!(drum_energy(0x24, true) < 0.5 * drum_energy(0x24, false));
  }

  #[test]
  fn hi_hats_cut_each_other() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0x99, 0x2a, 0x70);
    energy(&mut s, 32);
    s.midi_input(0x99, 0x2c, 0x70);
    energy(&mut s, SR as usize / 50);
    let drums = s.part(9).unwrap();
    assert_eq!(drums.note_count(), 1);
    assert_eq!(drums.notes()[0].key, 0x2c);
  }

  #[test]
  fn bank_select_falls_back_to_row_zero() {
    let mut b = RomBuilder::new();
    b.set_variation(0, 5, 1);
    let mut s = synth_from(b);
    assert_eq!(s.part(0).unwrap().instrument(), Some(0));
    s.midi_input(0xb0, 0x00, 3);
    s.midi_input(0xc0, 5, 0);
    assert_eq!(s.part(0).unwrap().instrument(), Some(1));
    assert_eq!(s.settings().part_at(0, PartParam::ToneNumber, 0), 3);
  }

  #[test]
  fn master_tune_sysex_moves_pitch() {
    let mut base = synth(SynthGen::SC55);
    base.set_audio_format(SR, 2);
    base.midi_input(0x90, 60, 127);
    energy(&mut base, 3200);
    let f0 = measure_hz(&mut base, SR as usize);
    // Root key at the ROM rate: one 32-sample sine period per 32 frames.
    assert!((f0 / 1000.0 - 1.0).abs() < 5e-4, "{f0}");

    let mut tuned = synth(SynthGen::SC55);
    tuned.set_audio_format(SR, 2);
    // 0x400 + 79 tenth-cents is A = 442 Hz.
    tuned.midi_input_sysex(&dt1(0x400000, &[0x00, 0x04, 0x04, 0x0f])).unwrap();
    tuned.midi_input(0x90, 60, 127);
    energy(&mut tuned, 3200);
    let f1 = measure_hz(&mut tuned, SR as usize);
    let want = 442.0 / 440.0;
    assert!(((f1 / f0) / want - 1.0).abs() < 5e-4, "{} vs {want}", f1 / f0);
  }

  #[test]
  fn polyphony_respects_reserves() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    for key in [0x24u8, 0x26, 0x28, 0x30] { s.midi_input(0x99, key, 100); }
    for key in 30..60u8 { s.midi_input(0x90, key, 100); }
    assert!(s.active_partials() <= SynthGen::SC55.polyphony());
    assert_eq!(s.part(9).unwrap().live_partials(), 4);
    // The oldest melodic notes were the ones taken.
    let melodic = s.part(0).unwrap();
    let killed: Vec<u8> = melodic.notes().iter().filter(|n| n.killed()).map(|n| n.key).collect();
    assert_eq!(killed, (30..30 + killed.len() as u8).collect::<Vec<_>>());
    assert!(!killed.is_empty());
  }

  #[test]
  fn active_sensing_timeout_releases_notes() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0xfe, 0, 0);
    s.midi_input(0x90, 60, 100);
    energy(&mut s, SR as usize * 400 / 1000);
    assert!(!s.part(0).unwrap().notes()[0].released());
    energy(&mut s, SR as usize * 40 / 1000);
    assert!(s.part(0).unwrap().notes().iter().all(|n| n.released()));

    // Without FE there is no timeout.
    let mut quiet = synth(SynthGen::SC55);
    quiet.set_audio_format(SR, 2);
    quiet.midi_input(0x90, 60, 100);
    energy(&mut quiet, SR as usize / 2);
    assert!(!quiet.part(0).unwrap().notes()[0].released());
  }

  #[test]
  fn tone_number_sysex_rebinds_part() {
    let mut b = RomBuilder::new();
    b.set_variation(0, 5, 1);
    let mut s = synth_from(b);
    // 40 11 00: tone number of channel 1 (storage slot 1).
    s.midi_input_sysex(&dt1(0x401100, &[0x00, 0x05])).unwrap();
    assert_eq!(s.part(0).unwrap().instrument(), Some(1));
    s.midi_input_sysex(&dt1(0x40007f, &[0x00])).unwrap();
    assert_eq!(s.part(0).unwrap().instrument(), Some(0));
  }

  #[test]
  fn gm_on_resets_and_locks_bank_select() {
    let mut b = RomBuilder::new();
    b.set_variation(8, 0, 1);
    let mut s = synth_from(b);
    assert_eq!(s.midi_input_sysex(&[0xf0, 0x7e, 0x7f, 0x09, 0x01, 0xf7]), Ok(SysExEvent::GmSystemOn));
    s.midi_input(0xb0, 0x00, 8);
    s.midi_input(0xc0, 0, 0);
    assert_eq!(s.part(0).unwrap().instrument(), Some(0));
  }

  #[test]
  fn second_port_drives_upper_parts() {
    let mut s = synth_from(RomBuilder::new().generation(SynthGen::SC88));
    s.set_audio_format(SR, 2);
    s.midi_input_port(1, 0x90, 60, 100);
    assert_eq!(s.part(16).unwrap().note_count(), 1);
    assert_eq!(s.part(0).unwrap().note_count(), 0);
  }

  #[test]
  fn master_volume_and_mono_output() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 1);
    s.midi_input(0x90, 60, 127);
    energy(&mut s, 3200);
    let loud = energy(&mut s, 3200);
    s.midi_input_sysex(&[0xf0, 0x7f, 0x7f, 0x04, 0x01, 0x00, 0x00, 0xf7]).unwrap();
    assert_eq!(energy(&mut s, 3200), 0.0);
    assert!(loud > 0.0);
    let mut mono = [1i16; 1];
    s.get_next_sample(&mut mono);
    assert_eq!(mono[0], 0);
  }

  #[test]
  fn effect_sends_follow_send_levels() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0xb0, 93, 0);
    s.midi_input(0x90, 60, 127);
    let mut rev = 0.0f32;
    for _ in 0..3200 {
      s.render_frame();
      rev = rev.max(s.effect_sends().reverb.abs());
      assert_eq!(s.effect_sends().chorus, 0.0);
    }
    assert!(rev > 0.0);
  }

  #[test]
  fn bad_sysex_is_rejected_without_side_effects() {
    let mut s = synth(SynthGen::SC55);
    let mut frame = dt1(0x400000, &[0x00, 0x04, 0x04, 0x0f]);
    let n = frame.len();
    frame[n - 2] ^= 0x01;
    assert!(matches!(s.midi_input_sysex(&frame), Err(SysExError::Checksum { .. })));
    assert_eq!(s.settings().master_tune(), 0x400);
    assert_eq!(s.midi_input_sysex(&[0xf0, 0x41]), Err(SysExError::NotSysEx));
  }

  #[test]
  fn unsubscribe_releases_held_notes() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0xb0, 64, 127);
    s.midi_input(0x90, 60, 100);
    s.midi_input(0x80, 60, 0);
    assert!(!s.part(0).unwrap().notes()[0].released());
    s.midi_unsubscribed();
    assert_eq!(s.settings().part(0, PartParam::Hold1), 0);
    assert!(s.part(0).unwrap().notes()[0].released());
  }

  #[test]
  fn mt32_map_rebinds_parts() {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(SR, 2);
    s.midi_input(0x90, 60, 100);
    s.set_map_mt32();
    assert!(s.settings().mt32_mode());
    assert_eq!(s.part(0).unwrap().note_count(), 0);
    assert_eq!(s.settings().drum_map(9), Some(0));
  }

  #[test]
  fn poisoned_lock_renders_silence() {
    let handle = synth(SynthGen::SC55).into_handle();
    let h = handle.clone();
    let _ = std::thread::spawn(move || {
      let _guard = h.lock().unwrap();
      panic!("poison");
    })
    .join();
    let mut out = [7i16; 2];
    assert!(!next_frame(&handle, &mut out));
    assert_eq!(out, [0, 0]);
  }
}
