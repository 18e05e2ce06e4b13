use std::ops::{Range, RangeInclusive};

use log::{debug, trace};

use super::params::{PartParam, SystemParam};
use super::Settings;
use crate::error::SysExError;

pub const SYSEX_MAX: usize = 1024;

const ROLAND: u8 = 0x41;
const UNIVERSAL_NON_REALTIME: u8 = 0x7e;
const UNIVERSAL_REALTIME: u8 = 0x7f;
const BROADCAST: u8 = 0x7f;
const MODEL_GS: u8 = 0x42;
const MODEL_SC55: u8 = 0x45;
const CMD_DT1: u8 = 0x12;

const GS_RESET_ADDRESS: u32 = 0x40007f;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysExTarget {
  System,
  Patch,
  Drum,
}

/// What a SysEx frame did, for the caller to follow up on (rebinding
/// programs, reloading drum maps, resetting voices).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SysExEvent {
  GsReset,
  GmSystemOn,
  GmSystemOff,
  Written { port: usize, target: SysExTarget, offset: usize, len: usize },
  /// Valid frame with nothing for the tone generator to do.
  Ignored,
}

struct Region {
  high: u8,
  mid: RangeInclusive<u8>,
  low: Range<usize>,
  target: SysExTarget,
}

// Address space reachable through DT1, keyed by (high, mid). Writes must fit
// inside one region.
const REGIONS: &[Region] = &[
  Region { high: 0x40, mid: 0x00..=0x00, low: 0x00..0x07, target: SysExTarget::System },
  Region { high: 0x40, mid: 0x00..=0x00, low: 0x7f..0x80, target: SysExTarget::System },
  Region { high: 0x40, mid: 0x01..=0x01, low: 0x00..0x41, target: SysExTarget::Patch },
  Region { high: 0x40, mid: 0x10..=0x1f, low: 0x00..PartParam::SYSEX_LEN, target: SysExTarget::Patch },
  Region { high: 0x40, mid: 0x20..=0x2f, low: 0x00..0x5b, target: SysExTarget::Patch },
  Region { high: 0x41, mid: 0x00..=0x00, low: 0x00..0x0c, target: SysExTarget::Drum },
  Region { high: 0x41, mid: 0x01..=0x08, low: 0x00..0x80, target: SysExTarget::Drum },
  Region { high: 0x41, mid: 0x10..=0x10, low: 0x00..0x0c, target: SysExTarget::Drum },
  Region { high: 0x41, mid: 0x11..=0x18, low: 0x00..0x80, target: SysExTarget::Drum },
];

pub fn roland_checksum(bytes: &[u8]) -> u8 {
  let sum = bytes.iter().fold(0u32, |acc, &b| acc + b as u32);
  ((0x80 - (sum & 0x7f)) & 0x7f) as u8
}

impl Settings {
  /// Applies one complete `F0 .. F7` frame.
  pub fn apply_sysex(&mut self, frame: &[u8]) -> Result<SysExEvent, SysExError> {
    if frame.len() > SYSEX_MAX {
      return Err(SysExError::TooLong(frame.len()));
    }
    if frame.len() < 4 || frame[0] != 0xf0 || frame[frame.len() - 1] != 0xf7 {
      return Err(SysExError::NotSysEx);
    }
    let body = &frame[1..frame.len() - 1];
    if let Some(&b) = body.iter().find(|&&b| b & 0x80 != 0) {
      return Err(SysExError::BadDataByte(b));
    }
    if self.system(SystemParam::RxSysEx) == 0 {
      return Ok(SysExEvent::Ignored);
    }

    match body[0] {
      ROLAND => self.apply_roland(body),
      UNIVERSAL_NON_REALTIME => match body.get(2..4) {
        Some([0x09, 0x01]) => Ok(SysExEvent::GmSystemOn),
        Some([0x09, 0x02]) => Ok(SysExEvent::GmSystemOff),
        _ => Err(SysExError::Unsupported),
      },
      UNIVERSAL_REALTIME => match body.get(2..6) {
        // Master volume, LSB then MSB.
        Some(&[0x04, 0x01, _, msb]) => {
          self.set_system(SystemParam::Volume, msb);
          Ok(SysExEvent::Written { port: 0, target: SysExTarget::System, offset: SystemParam::Volume.addr(), len: 1 })
        }
        _ => Err(SysExError::Unsupported),
      },
      _ => Err(SysExError::Unsupported),
    }
  }

  fn apply_roland(&mut self, body: &[u8]) -> Result<SysExEvent, SysExError> {
    // 41 dev model cmd a2 a1 a0 data.. sum
    if body.len() < 9 {
      return Err(SysExError::Unsupported);
    }
    let dev = body[1];
    if dev != self.device_id() && dev != BROADCAST {
      return Err(SysExError::WrongDevice(dev));
    }
    let model = body[2];
    if model == MODEL_SC55 {
      trace!("SC-55 display message ignored");
      return Ok(SysExEvent::Ignored);
    }
    if model != MODEL_GS || body[3] != CMD_DT1 {
      return Err(SysExError::Unsupported);
    }

    let payload = &body[4..body.len() - 1];
    let got = body[body.len() - 1];
    let expected = roland_checksum(payload);
    if got != expected {
      return Err(SysExError::Checksum { expected, got });
    }

    let address = u32::from_be_bytes([0, payload[0], payload[1], payload[2]]);
    let data = &payload[3..];

    if address == GS_RESET_ADDRESS && data == [0x00] {
      return if self.system(SystemParam::RxGsReset) != 0 { Ok(SysExEvent::GsReset) } else { Ok(SysExEvent::Ignored) };
    }

    let (port, target, offset) = self.decode_address(address, data.len())?;
    debug!("DT1 {address:06X}h +{} -> {target:?} {offset:04X}h (port {port})", data.len());
    for (i, &v) in data.iter().enumerate() {
      match target {
        SysExTarget::System => self.write_system(offset + i, v),
        SysExTarget::Patch => self.write_patch(port, offset + i, v),
        SysExTarget::Drum => self.write_drum(port, offset + i, v),
      }
    }
    Ok(SysExEvent::Written { port, target, offset, len: data.len() })
  }

  /// Maps a 24-bit GS address to (port, memory, offset). The second port
  /// uses high bytes 0x50/0x51.
  fn decode_address(&self, address: u32, len: usize) -> Result<(usize, SysExTarget, usize), SysExError> {
    let unknown = SysExError::UnknownAddress { address, len };
    let [_, mut high, mid, low] = address.to_be_bytes();
    let port = if high & 0xf0 == 0x50 { 1 } else { 0 };
    if port >= self.ports() { return Err(unknown); }
    high &= !0x10;
    let low = low as usize;

    let region = REGIONS
      .iter()
      .find(|r| r.high == high && r.mid.contains(&mid) && r.low.contains(&low))
      .ok_or(unknown.clone())?;
    if len == 0 || low + len > region.low.end {
      return Err(unknown);
    }
    let offset = match region.target {
      SysExTarget::System => low,
      SysExTarget::Patch | SysExTarget::Drum => ((mid as usize) << 8) | low,
    };
    Ok((port, region.target, offset))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::rom::control_rom::SynthGen;
  use crate::engine::settings::{CtrlDest, DrumParam, PatchParam};

  fn dt1(dev: u8, address: u32, data: &[u8]) -> Vec<u8> {
    let a = address.to_be_bytes();
    let mut payload = vec![a[1], a[2], a[3]];
    payload.extend_from_slice(data);
    let mut f = vec![0xf0, 0x41, dev, 0x42, 0x12];
    f.extend_from_slice(&payload);
    f.push(roland_checksum(&payload));
    f.push(0xf7);
    f
  }

  #[test]
  fn checksum_matches_manual_example() {
    // GS reset as printed in the owner's manual: F0 41 10 42 12 40 00 7F 00 41 F7
    assert_eq!(roland_checksum(&[0x40, 0x00, 0x7f, 0x00]), 0x41);
  }

  #[test]
  fn gs_reset_and_gm_on_are_recognised() {
    let mut s = Settings::new(SynthGen::SC55);
    assert_eq!(s.apply_sysex(&[0xf0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7f, 0x00, 0x41, 0xf7]), Ok(SysExEvent::GsReset));
    assert_eq!(s.apply_sysex(&[0xf0, 0x7e, 0x7f, 0x09, 0x01, 0xf7]), Ok(SysExEvent::GmSystemOn));
    s.set_system(SystemParam::RxGsReset, 0);
    assert_eq!(s.apply_sysex(&dt1(0x10, 0x40007f, &[0])), Ok(SysExEvent::Ignored));
  }

  #[test]
  fn master_tune_write_via_dt1() {
    let mut s = Settings::new(SynthGen::SC55);
    let ev = s.apply_sysex(&dt1(0x10, 0x400000, &[0x00, 0x04, 0x04, 0x0f])).unwrap();
    assert_eq!(ev, SysExEvent::Written { port: 0, target: SysExTarget::System, offset: 0, len: 4 });
    assert_eq!(s.master_tune(), 0x44f);
  }

  #[test]
  fn part_write_uses_storage_slots() {
    let mut s = Settings::new(SynthGen::SC55);
    // 40 11 19: part level of the part in slot 1, i.e. MIDI channel 1.
    s.apply_sysex(&dt1(0x10, 0x401119, &[55])).unwrap();
    assert_eq!(s.part(0, PartParam::PartLevel), 55);
    s.apply_sysex(&dt1(0x7f, 0x401019, &[33])).unwrap();
    assert_eq!(s.part(9, PartParam::PartLevel), 33);
  }

  #[test]
  fn macro_write_via_dt1_fills_rows() {
    let mut s = Settings::new(SynthGen::SC55);
    s.apply_sysex(&dt1(0x10, 0x400138, &[5])).unwrap();
    assert_eq!(s.patch_param(0, PatchParam::ChorusFeedback), 112);
    assert_eq!(s.patch_param(0, PatchParam::ChorusDepth), 5);
  }

  #[test]
  fn controller_depth_write_updates_matrix() {
    let mut s = Settings::new(SynthGen::SC55);
    s.set_part(0, PartParam::Modulation, 127);
    // Modulation -> LFO1 pitch depth for channel 1 (slot 1).
    s.apply_sysex(&dt1(0x10, 0x402104, &[0x7f])).unwrap();
    assert_eq!(s.accumulated(0, CtrlDest::Lfo1PitchDepth), ((127 * 127 * 2438i64) >> 16) as i32);
  }

  #[test]
  fn drum_write_lands_in_map() {
    let mut s = Settings::new(SynthGen::SC55);
    s.apply_sysex(&dt1(0x10, 0x411724, &[0])).unwrap();
    assert_eq!(s.drum(1, DrumParam::RxNoteOff, 0x24), 0);
    s.apply_sysex(&dt1(0x10, 0x410200, &[99])).unwrap();
    assert_eq!(s.drum(0, DrumParam::Level, 0), 99);
  }

  #[test]
  fn rejections() {
    let mut s = Settings::new(SynthGen::SC55);
    let mut bad = dt1(0x10, 0x400004, &[100]);
    let n = bad.len();
    bad[n - 2] ^= 1;
    assert!(matches!(s.apply_sysex(&bad), Err(SysExError::Checksum { .. })));
    assert_eq!(s.apply_sysex(&dt1(0x11, 0x400004, &[1])), Err(SysExError::WrongDevice(0x11)));
    assert!(matches!(s.apply_sysex(&dt1(0x10, 0x400010, &[1])), Err(SysExError::UnknownAddress { .. })));
    // Runs past the end of the system block.
    assert!(matches!(s.apply_sysex(&dt1(0x10, 0x400005, &[1, 2, 3])), Err(SysExError::UnknownAddress { .. })));
    // Second port on a single-port generation.
    assert!(matches!(s.apply_sysex(&dt1(0x10, 0x501119, &[1])), Err(SysExError::UnknownAddress { .. })));
    assert_eq!(s.apply_sysex(&[0xf0, 0x41, 0x90, 0xf7]), Err(SysExError::BadDataByte(0x90)));
    assert_eq!(s.apply_sysex(&[0x41, 0x10]), Err(SysExError::NotSysEx));
    let mut long = vec![0xf0];
    long.resize(SYSEX_MAX, 0);
    long.push(0xf7);
    assert_eq!(s.apply_sysex(&long), Err(SysExError::TooLong(SYSEX_MAX + 1)));
    assert_eq!(s.system(SystemParam::Volume), 127);
  }

  #[test]
  fn port_b_addresses_on_sc88() {
    let mut s = Settings::new(SynthGen::SC88);
    s.apply_sysex(&dt1(0x10, 0x501119, &[21])).unwrap();
    assert_eq!(s.part(16, PartParam::PartLevel), 21);
    assert_eq!(s.part(0, PartParam::PartLevel), 100);
  }

  #[test]
  fn universal_master_volume() {
    let mut s = Settings::new(SynthGen::SC55);
    s.apply_sysex(&[0xf0, 0x7f, 0x7f, 0x04, 0x01, 0x00, 0x50, 0xf7]).unwrap();
    assert_eq!(s.system(SystemParam::Volume), 0x50);
  }
}
