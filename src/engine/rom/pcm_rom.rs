use std::fs;
use std::path::Path;

use log::{debug, info};

use super::control_rom::{ControlRom, Sample};
use crate::engine::dsp::biquad::RiaaFilter;
use crate::error::{Error, Result};

const MIB: usize = 0x100000;

// Destination address bit k comes from source bit ADDRESS_ORDER[k] when
// descrambling, i.e. the scrambler scattered bit k to ADDRESS_ORDER[k].
const ADDRESS_ORDER: [u32; 20] = [2, 0, 3, 4, 1, 9, 13, 10, 18, 17, 6, 15, 11, 16, 8, 5, 12, 7, 14, 19];
const DATA_ORDER: [u32; 8] = [2, 0, 4, 5, 7, 6, 3, 1];

// The PCM is stored pre-emphasised; the decoder removes it at the hardware
// rate.
const REFERENCE_RATE: f32 = 32000.0;
const RIAA_DC_GAIN: f32 = 15.0;

/// Source address in the scrambled dump holding the byte that ends up at
/// `addr`. Only the low 20 bits are permuted.
#[inline]
pub fn scrambled_address(addr: usize) -> usize {
  let low = (addr & 0xfffff) as u32;
  let mut src = 0u32;
  for (k, &b) in ADDRESS_ORDER.iter().enumerate() {
    src |= ((low >> k) & 1) << b;
  }
  (addr & !0xfffff) | src as usize
}

#[inline]
pub fn descramble_byte(b: u8) -> u8 {
  let mut out = 0u8;
  for (k, &s) in DATA_ORDER.iter().enumerate() {
    out |= ((b >> s) & 1) << k;
  }
  out
}

/// Undo the address and data line swapping of one wave ROM dump.
pub fn descramble(src: &[u8]) -> Result<Vec<u8>> {
  if src.len() != MIB && src.len() != 2 * MIB {
    return Err(Error::RomSize { kind: "PCM", size: src.len() });
  }
  let mut dst = vec![0u8; src.len()];
  for (i, d) in dst.iter_mut().enumerate() {
    *d = if i < 0x20 { src[i] } else { descramble_byte(src[scrambled_address(i)]) };
  }
  Ok(dst)
}

fn bank_base(address: u32) -> Result<usize> {
  match (address >> 20) & 0x7 {
    0 => Ok(0),
    1 | 2 => Ok(MIB),
    4 => Ok(2 * MIB),
    b => Err(Error::RomContent(format!("sample address {address:06X}h selects unknown bank {b}"))),
  }
}

/// Expands one sample: signed 8-bit data scaled by a per-32-sample nibble
/// shift, then two RIAA de-emphasis stages.
fn expand_sample(rom: &[u8], s: &Sample) -> Result<Vec<f32>> {
  let base = bank_base(s.address)? + (s.address & 0xfffff) as usize;
  let len = s.sample_len as usize + 1;
  if base + len > rom.len() {
    return Err(Error::RomContent(format!(
      "sample at {:06X}h (+{len}) runs past the {} byte wave image", s.address, rom.len()
    )));
  }

  let mut riaa = [RiaaFilter::new(REFERENCE_RATE, RIAA_DC_GAIN), RiaaFilter::new(REFERENCE_RATE, RIAA_DC_GAIN)];
  let mut out = Vec::with_capacity(len);
  for i in 0..len {
    let a = base + i;
    let data = rom[a] as i8 as i32;
    let nibble = rom[((a & 0xfffff) >> 5) | (a & 0xf00000)];
    let shift = if i & 0x10 != 0 { nibble >> 4 } else { nibble & 0x0f };
    let s32 = (data << shift) << 14;
    let x = s32 as f32 / 2147483648.0;
    let y = riaa[0].apply(x);
    out.push(riaa[1].apply(y));
  }
  Ok(out)
}

/// Decoded PCM banks, one float vector per control ROM sample descriptor.
pub struct PcmRom {
  samples: Vec<Vec<f32>>,
}

impl PcmRom {
  /// Reads, descrambles and concatenates the wave ROM dumps in order, then
  /// decodes every sample the control ROM describes.
  pub fn load<P: AsRef<Path>>(paths: &[P], control: &ControlRom) -> Result<Self> {
    let mut image = Vec::new();
    for p in paths {
      let path = p.as_ref();
      let raw = fs::read(path).map_err(|source| Error::RomIo { path: path.to_path_buf(), source })?;
      debug!("descrambling {} ({} bytes)", path.display(), raw.len());
      image.extend_from_slice(&descramble(&raw)?);
    }
    let rom = Self::from_image(&image, control.samples())?;
    info!("PCM ROM: {} samples decoded from {} KiB", rom.samples.len(), image.len() / 1024);
    Ok(rom)
  }

  pub fn from_image(image: &[u8], descriptors: &[Sample]) -> Result<Self> {
    let samples = descriptors.iter().map(|s| expand_sample(image, s)).collect::<Result<Vec<_>>>()?;
    Ok(Self { samples })
  }

  /// Already-decoded banks, indexed like the sample descriptors.
  pub fn from_banks(samples: Vec<Vec<f32>>) -> Self { Self { samples } }

  pub fn sample(&self, index: u16) -> &[f32] {
    self.samples.get(index as usize).map_or(&[], |v| v.as_slice())
  }

  pub fn len(&self) -> usize { self.samples.len() }
  pub fn is_empty(&self) -> bool { self.samples.is_empty() }
}
