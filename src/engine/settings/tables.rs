use super::params::DESTINATIONS;

// Reverb macro rows: Character, PreLPF, Level, Time, DelayFeedback,
// SendToChorus, PredelayTime.
pub const REVERB_MACROS: [[u8; 7]; 8] = [
  [0, 3, 64, 80, 0, 0, 0],   // Room 1
  [1, 4, 64, 56, 0, 0, 0],   // Room 2
  [2, 0, 64, 64, 0, 0, 0],   // Room 3
  [3, 4, 64, 72, 0, 0, 0],   // Hall 1
  [4, 0, 64, 64, 0, 0, 0],   // Hall 2
  [5, 0, 64, 88, 0, 0, 0],   // Plate
  [6, 0, 64, 32, 40, 0, 0],  // Delay
  [7, 0, 64, 64, 32, 0, 0],  // Panning Delay
];

// Chorus macro rows: PreLPF, Level, Feedback, Delay, Rate, Depth,
// SendToReverb, SendToDelay.
pub const CHORUS_MACROS: [[u8; 8]; 8] = [
  [0, 64, 0, 112, 3, 5, 0, 0],    // Chorus 1
  [0, 64, 5, 80, 9, 19, 0, 0],    // Chorus 2
  [0, 64, 8, 80, 3, 19, 0, 0],    // Chorus 3
  [0, 64, 16, 64, 9, 16, 0, 0],   // Chorus 4
  [0, 64, 64, 127, 2, 24, 0, 0],  // Feedback Chorus
  [0, 64, 112, 127, 1, 5, 0, 0],  // Flanger
  [0, 64, 0, 127, 0, 127, 0, 0],  // Short Delay
  [0, 64, 80, 127, 0, 127, 0, 0], // Short Delay (FB)
];

pub const DEFAULT_REVERB_MACRO: u8 = 4;
pub const DEFAULT_CHORUS_MACRO: u8 = 2;

// Controller matrix shaping, indexed by destination. The accumulated sum is
// clamped to LIMIT, multiplied by GAIN and shifted right by 16, which lands
// in cents for pitch/cutoff/LFO pitch and filter depths, in per-mille for
// amplitude and TVA depths, and in 0.01 Hz for the LFO rates.
pub const BIAS: [i32; DESTINATIONS] = [0x40, 0x40, 0x40, 0x40, 0, 0, 0, 0x40, 0, 0, 0];
pub const SCALE: [i32; DESTINATIONS] = [1, 1, 1, 1, 1, 2, 4, 1, 1, 2, 4];
pub const LIMIT: [i32; DESTINATIONS] = [3048, 8128, 8128, 8128, 16129, 8064, 4032, 8128, 16129, 8064, 4032];
pub const GAIN: [i64; DESTINATIONS] = [51603, 77405, 8063, 8063, 2438, 19504, 16253, 8063, 2438, 19504, 16253];

/// Power-on voice reserve per storage slot (slot 0 is the rhythm part).
pub const VOICE_RESERVE: [u8; 16] = [6, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2];

pub struct Mt32Part {
  pub program: u8,
  pub pan: u8,
  pub reverb: u8,
}

/// Bank of the MT-32 compatible tone set.
pub const MT32_BANK: u8 = 127;
/// Drum set program holding the MT-32 rhythm map.
pub const MT32_DRUM_PROGRAM: u8 = 127;

// MT-32 power-on setup for MIDI channels 2..9; channel 10 is the rhythm part.
pub const MT32_PARTS: [(usize, Mt32Part); 8] = [
  (1, Mt32Part { program: 0, pan: 0x40, reverb: 0x40 }),
  (2, Mt32Part { program: 68, pan: 0x5a, reverb: 0x40 }),
  (3, Mt32Part { program: 48, pan: 0x26, reverb: 0x40 }),
  (4, Mt32Part { program: 95, pan: 0x6c, reverb: 0x40 }),
  (5, Mt32Part { program: 78, pan: 0x14, reverb: 0x40 }),
  (6, Mt32Part { program: 41, pan: 0x40, reverb: 0x40 }),
  (7, Mt32Part { program: 3, pan: 0x33, reverb: 0x40 }),
  (8, Mt32Part { program: 110, pan: 0x4d, reverb: 0x40 }),
];
