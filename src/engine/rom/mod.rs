pub mod control_rom;
pub mod pcm_rom;

pub use control_rom::{ControlRom, SynthGen};
pub use pcm_rom::PcmRom;
