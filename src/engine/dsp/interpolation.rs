use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Kernel resolution: fractional phase is quantized to 1/256.
pub const KERNEL_STEPS: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Interpolation {
  Nearest,
  Linear,
  #[default]
  Cubic,
}

impl Interpolation {
  pub fn from_index(index: u8) -> Self {
    match index {
      0 => Interpolation::Nearest,
      1 => Interpolation::Linear,
      _ => Interpolation::Cubic,
    }
  }

  pub fn index(self) -> u8 {
    match self {
      Interpolation::Nearest => 0,
      Interpolation::Linear => 1,
      Interpolation::Cubic => 2,
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s.to_ascii_lowercase().as_str() {
      "nearest" => Some(Interpolation::Nearest),
      "linear" => Some(Interpolation::Linear),
      "cubic" => Some(Interpolation::Cubic),
      _ => None,
    }
  }
}

static LINEAR: Lazy<Vec<[f32; 2]>> = Lazy::new(|| {
  (0..KERNEL_STEPS)
    .map(|i| {
      let t = i as f32 / KERNEL_STEPS as f32;
      [1.0 - t, t]
    })
    .collect()
});

// Four-tap Lagrange weights for taps at -1, 0, 1, 2.
static CUBIC: Lazy<Vec<[f32; 4]>> = Lazy::new(|| {
  (0..KERNEL_STEPS)
    .map(|i| {
      let t = i as f64 / KERNEL_STEPS as f64;
      [
        (-t * (t - 1.0) * (t - 2.0) / 6.0) as f32,
        ((t + 1.0) * (t - 1.0) * (t - 2.0) / 2.0) as f32,
        (-(t + 1.0) * t * (t - 2.0) / 2.0) as f32,
        ((t + 1.0) * t * (t - 1.0) / 6.0) as f32,
      ]
    })
    .collect()
});

#[inline]
fn kernel_index(frac: f32) -> usize {
  ((frac * KERNEL_STEPS as f32) as usize).min(KERNEL_STEPS - 1)
}

#[inline]
pub fn linear(s0: f32, s1: f32, frac: f32) -> f32 {
  let k = &LINEAR[kernel_index(frac)];
  s0 * k[0] + s1 * k[1]
}

#[inline]
pub fn cubic(taps: [f32; 4], frac: f32) -> f32 {
  let k = &CUBIC[kernel_index(frac)];
  taps[0] * k[0] + taps[1] * k[1] + taps[2] * k[2] + taps[3] * k[3]
}

/// Forces table construction so the first note-on does not pay for it on
/// the audio thread.
pub fn warm_up() {
  Lazy::force(&LINEAR);
  Lazy::force(&CUBIC);
}
