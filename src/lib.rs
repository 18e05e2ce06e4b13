pub mod engine {
  pub mod audio;
  pub mod dsp;
  pub mod messages;
  pub mod modules;
  pub mod part;
  pub mod rom;
  pub mod settings;
  pub mod synth;
}
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod test_support;

pub use engine::synth::{Synth, SynthHandle};
pub use error::{Error, Result, SysExError};
