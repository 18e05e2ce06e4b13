pub mod envelope;
pub mod lfo;
pub mod note;
pub mod partial;
pub mod tva;
pub mod tvf;
pub mod tvp;

use crate::engine::rom::{ControlRom, PcmRom};
use crate::engine::settings::Settings;

/// Read-only view a voice needs while rendering. Built per frame by the
/// synth from the state it owns; voices never store it.
#[derive(Clone, Copy)]
pub struct RenderCtx<'a> {
  pub settings: &'a Settings,
  pub ctrl_rom: &'a ControlRom,
  pub pcm_rom: &'a PcmRom,
  pub sample_rate: f32,
}

/// Log volume byte to linear gain, 127 -> 1.0, 0 -> 0.0.
#[inline]
pub fn volume_curve(v: u8) -> f32 { volume_curve_f(v as f32) }

/// `volume_curve` for fractional steps, such as a sample volume carrying its
/// fine adjustment.
#[inline]
pub fn volume_curve_f(v: f32) -> f32 {
  (0.1 * 2f32.powf(v / 36.7111) - 0.1).max(0.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn volume_curve_endpoints() {
    assert_eq!(volume_curve(0), 0.0);
    assert!((volume_curve(127) - 1.0).abs() < 1e-3);
    assert!(volume_curve(64) < volume_curve(100));
  }
}
