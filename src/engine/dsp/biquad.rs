use std::f64::consts::PI;

// Second-order IIR section. Coefficients use the `d` (feedback) / `n`
// (feedforward) naming with the feedback terms subtracted.
#[derive(Clone, Copy, Debug)]
pub struct Biquad {
  n0: f32,
  n1: f32,
  n2: f32,
  d1: f32,
  d2: f32,
  x1: f32,
  x2: f32,
  y1: f32,
  y2: f32,
}

impl Biquad {
  pub fn new() -> Self {
    Self { n0: 1.0, n1: 0.0, n2: 0.0, d1: 0.0, d2: 0.0, x1: 0.0, x2: 0.0, y1: 0.0, y2: 0.0 }
  }

  pub fn with_coefficients(n0: f32, n1: f32, n2: f32, d1: f32, d2: f32) -> Self {
    Self { n0, n1, n2, d1, d2, ..Self::new() }
  }

  pub fn set_coefficients(&mut self, n0: f32, n1: f32, n2: f32, d1: f32, d2: f32) {
    self.n0 = n0; self.n1 = n1; self.n2 = n2; self.d1 = d1; self.d2 = d2;
  }

  #[inline]
  pub fn apply(&mut self, x: f32) -> f32 {
    let y = self.n0 * x + self.n1 * self.x1 + self.n2 * self.x2 - self.d1 * self.y1 - self.d2 * self.y2;
    self.x2 = self.x1; self.x1 = x;
    self.y2 = self.y1; self.y1 = y;
    y
  }

  /// Analytic gain at z = 1.
  pub fn dc_gain(&self) -> f32 {
    (self.n0 + self.n1 + self.n2) / (1.0 + self.d1 + self.d2)
  }
}

impl Default for Biquad {
  fn default() -> Self { Self::new() }
}

/// Resonant low-pass used by the TVF. Coefficients come from the bilinear
/// transform of `w² / (s² + (w/q)s + w²)` and are only recomputed when the
/// cutoff, Q or sample rate actually change.
#[derive(Clone, Debug)]
pub struct LowPassFilter {
  bq: Biquad,
  sample_rate: f32,
  last_f: f32,
  last_q: f32,
}

impl LowPassFilter {
  pub fn new(sample_rate: f32) -> Self {
    Self { bq: Biquad::new(), sample_rate, last_f: -1.0, last_q: -1.0 }
  }

  pub fn calculate_coefficients(&mut self, f: f32, q: f32) {
    if f == self.last_f && q == self.last_q { return; }
    self.last_f = f;
    self.last_q = q;

    let w = 2.0 * PI * f as f64;
    let t = 1.0 / self.sample_rate as f64;
    let wq = w / q.max(0.01) as f64;
    let w2t2 = w * w * t * t;
    let d = 4.0 + wq * 2.0 * t + w2t2;

    let d1 = (2.0 * w2t2 - 8.0) / d;
    let d2 = (4.0 - wq * 2.0 * t + w2t2) / d;
    let n0 = w2t2 / d;
    self.bq.set_coefficients(n0 as f32, (2.0 * n0) as f32, n0 as f32, d1 as f32, d2 as f32);
  }

  #[inline]
  pub fn apply(&mut self, x: f32) -> f32 { self.bq.apply(x) }
}

// RIAA time constants in seconds.
const RIAA_T_ZERO_1: f64 = 318e-6;
const RIAA_T_ZERO_2: f64 = 3.18e-6;
const RIAA_T_POLE_1: f64 = 75e-6;
const RIAA_T_POLE_2: f64 = 3180e-6;

/// RIAA de-emphasis section. Poles and zeros are matched from the four
/// classic time constants; the numerator is rescaled so the DC gain equals
/// `dc_gain`.
#[derive(Clone, Debug)]
pub struct RiaaFilter {
  bq: Biquad,
}

impl RiaaFilter {
  pub fn new(sample_rate: f32, dc_gain: f32) -> Self {
    let fs = sample_rate as f64;
    let root = |tau: f64| (-1.0 / (fs * tau)).exp();
    let (z1, z2) = (root(RIAA_T_ZERO_1), root(RIAA_T_ZERO_2));
    let (p1, p2) = (root(RIAA_T_POLE_1), root(RIAA_T_POLE_2));

    let (mut n0, mut n1, mut n2) = (1.0, -(z1 + z2), z1 * z2);
    let (d1, d2) = (-(p1 + p2), p1 * p2);

    let g = dc_gain as f64 * (1.0 + d1 + d2) / (n0 + n1 + n2);
    n0 *= g; n1 *= g; n2 *= g;

    Self { bq: Biquad::with_coefficients(n0 as f32, n1 as f32, n2 as f32, d1 as f32, d2 as f32) }
  }

  #[inline]
  pub fn apply(&mut self, x: f32) -> f32 { self.bq.apply(x) }

  pub fn dc_gain(&self) -> f32 { self.bq.dc_gain() }
}

/// Lowest pole frequency of the RIAA section in Hz; used to size settle tests.
pub fn riaa_lowest_pole_hz() -> f32 {
  (1.0 / (2.0 * PI * RIAA_T_POLE_2)) as f32
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn riaa_dc_settles_to_configured_gain() {
    let fs = 32000.0;
    let mut f = RiaaFilter::new(fs, 15.0);
    let n = (4.0 * fs / riaa_lowest_pole_hz()) as usize;
    let mut y = 0.0;
    for _ in 0..n { y = f.apply(1.0); }
    assert!((y - 15.0).abs() < 0.01, "settled at {y}");
    assert!((f.dc_gain() - 15.0).abs() < 0.01);
  }

  #[test]
  fn lowpass_passes_dc_and_skips_redundant_updates() {
    let mut lp = LowPassFilter::new(44100.0);
    lp.calculate_coefficients(1000.0, 0.707);
    let before = lp.bq;
    lp.calculate_coefficients(1000.0, 0.707);
    assert_eq!(before.n0, lp.bq.n0);
    let mut y = 0.0;
    for _ in 0..20000 { y = lp.apply(1.0); }
    assert!((y - 1.0).abs() < 1e-3);
  }

  #[test]
  fn lowpass_attenuates_far_above_cutoff() {
    let fs = 44100.0;
    let mut lp = LowPassFilter::new(fs);
    lp.calculate_coefficients(200.0, 0.707);
    let mut peak = 0.0f32;
    for i in 0..20000 {
      let x = (2.0 * std::f32::consts::PI * 10000.0 * i as f32 / fs).sin();
      let y = lp.apply(x);
      if i > 10000 { peak = peak.max(y.abs()); }
    }
    assert!(peak < 0.01, "peak {peak}");
  }
}
