pub mod biquad;
pub mod interpolation;
