// Parameter addresses. System and patch values are offsets into the
// corresponding memory; the GS address is `0x40 << 16 | offset` for the
// SysEx-visible ones. Anything at 0x80 or above in a block is engine-side
// state (live controller values, RPN/NRPN selection) that SysEx cannot reach.

pub const SYSTEM_SIZE: usize = 0x100;
pub const PATCH_SIZE: usize = 0x3000;
pub const DRUM_MAP_SIZE: usize = 0x1000;
pub const DRUM_MAPS: usize = 2;

pub const PART_BLOCK: usize = 0x1000;
pub const CONTROLLER_BLOCK: usize = 0x2000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemParam {
  /// Four nibbles, 0x0400 = 440 Hz, 0.1 cent steps.
  Tune = 0x00,
  Volume = 0x04,
  KeyShift = 0x05,
  Pan = 0x06,
  ModeSet = 0x7f,
  RxSysEx = 0x80,
  RxGsReset = 0x81,
  DeviceId = 0x82,
  RxInstrumentChange = 0x83,
  /// uint32 big-endian.
  SampleRate = 0x84,
  Interpolation = 0x88,
}

impl SystemParam {
  #[inline]
  pub fn addr(self) -> usize { self as usize }
}

/// Patch-common parameters (shared by every part of a port).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum PatchParam {
  PatchName = 0x0100,
  /// Sixteen bytes in storage order, see `storage_part`.
  VoiceReserve = 0x0110,
  ReverbMacro = 0x0130,
  ReverbCharacter = 0x0131,
  ReverbPreLpf = 0x0132,
  ReverbLevel = 0x0133,
  ReverbTime = 0x0134,
  ReverbDelayFeedback = 0x0135,
  ReverbSendToChorus = 0x0136,
  ReverbPredelayTime = 0x0137,
  ChorusMacro = 0x0138,
  ChorusPreLpf = 0x0139,
  ChorusLevel = 0x013a,
  ChorusFeedback = 0x013b,
  ChorusDelay = 0x013c,
  ChorusRate = 0x013d,
  ChorusDepth = 0x013e,
  ChorusSendToReverb = 0x013f,
  ChorusSendToDelay = 0x0140,
}

impl PatchParam {
  #[inline]
  pub fn addr(self) -> usize { self as usize }
}

/// Offsets inside a part block (`0x1000 | storage_part << 8`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PartParam {
  /// Two bytes: bank (CC#0 value), program.
  ToneNumber = 0x00,
  RxChannel = 0x02,
  RxPitchBend = 0x03,
  RxChannelPressure = 0x04,
  RxProgramChange = 0x05,
  RxControlChange = 0x06,
  RxPolyPressure = 0x07,
  RxNoteMessage = 0x08,
  RxRpn = 0x09,
  RxNrpn = 0x0a,
  RxModulation = 0x0b,
  RxVolume = 0x0c,
  RxPanpot = 0x0d,
  RxExpression = 0x0e,
  RxHold1 = 0x0f,
  RxPortamento = 0x10,
  RxSostenuto = 0x11,
  RxSoft = 0x12,
  PolyMode = 0x13,
  AssignMode = 0x14,
  UseForRhythm = 0x15,
  PitchKeyShift = 0x16,
  /// Two nibbles, 0x80 = no offset, 0.1 Hz steps.
  PitchOffsetFine = 0x17,
  PartLevel = 0x19,
  VelocitySenseDepth = 0x1a,
  VelocitySenseOffset = 0x1b,
  PartPanpot = 0x1c,
  KeyRangeLow = 0x1d,
  KeyRangeHigh = 0x1e,
  Cc1ControllerNumber = 0x1f,
  Cc2ControllerNumber = 0x20,
  ChorusSendLevel = 0x21,
  ReverbSendLevel = 0x22,
  RxBankSelect = 0x23,
  VibratoRate = 0x30,
  VibratoDepth = 0x31,
  TvfCutoff = 0x32,
  TvfResonance = 0x33,
  EnvAttack = 0x34,
  EnvDecay = 0x35,
  EnvRelease = 0x36,
  VibratoDelay = 0x37,
  /// Twelve bytes, C through B.
  ScaleTuning = 0x40,

  Modulation = 0x80,
  /// uint14, MSB first.
  PitchBend = 0x81,
  ChannelPressure = 0x83,
  PolyKeyPressure = 0x84,
  Cc1 = 0x85,
  Cc2 = 0x86,
  Expression = 0x87,
  Hold1 = 0x88,
  Portamento = 0x89,
  Sostenuto = 0x8a,
  Soft = 0x8b,
  RpnMsb = 0x8c,
  RpnLsb = 0x8d,
  NrpnMsb = 0x8e,
  NrpnLsb = 0x8f,
  /// uint16 big-endian of two 7-bit bytes, 0x4000 = centre.
  PitchFineTune = 0x90,
  PitchCoarseTune = 0x92,
  /// Bank select MSB waiting for the next program change.
  BankMsb = 0x93,
  BankLsb = 0x95,
  /// Which of RPN or NRPN the data entry controllers address.
  ParamSelect = 0x96,
}

impl PartParam {
  #[inline]
  pub fn offset(self) -> usize { self as usize }

  /// SysEx-visible part block length.
  pub const SYSEX_LEN: usize = 0x4c;
}

pub const PARAM_SELECT_NONE: u8 = 0;
pub const PARAM_SELECT_RPN: u8 = 1;
pub const PARAM_SELECT_NRPN: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DrumParam {
  /// Twelve bytes in the key slots 0..12 of this row.
  Name = 0x0,
  PlayKeyNumber = 0x1,
  Level = 0x2,
  AssignGroup = 0x3,
  Panpot = 0x4,
  ReverbDepth = 0x5,
  ChorusDepth = 0x6,
  RxNoteOff = 0x7,
  RxNoteOn = 0x8,
  /// NRPN pitch coarse, 0x40 = none.
  PitchCoarse = 0xf,
}

impl DrumParam {
  #[inline]
  pub fn addr(self, map: usize, key: u8) -> usize { (map << 12) | ((self as usize) << 8) | (key as usize & 0x7f) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtrlSource {
  Modulation = 0,
  PitchBend = 1,
  ChannelPressure = 2,
  PolyKeyPressure = 3,
  Cc1 = 4,
  Cc2 = 5,
}

pub const SOURCES: [CtrlSource; 6] = [
  CtrlSource::Modulation,
  CtrlSource::PitchBend,
  CtrlSource::ChannelPressure,
  CtrlSource::PolyKeyPressure,
  CtrlSource::Cc1,
  CtrlSource::Cc2,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtrlDest {
  PitchControl = 0,
  TvfCutoff = 1,
  Amplitude = 2,
  Lfo1Rate = 3,
  Lfo1PitchDepth = 4,
  Lfo1TvfDepth = 5,
  Lfo1TvaDepth = 6,
  Lfo2Rate = 7,
  Lfo2PitchDepth = 8,
  Lfo2TvfDepth = 9,
  Lfo2TvaDepth = 10,
}

pub const DESTINATIONS: usize = 11;

/// Offset of a controller depth inside a controller block
/// (`0x2000 | storage_part << 8`).
#[inline]
pub fn controller_offset(src: CtrlSource, dest: CtrlDest) -> usize {
  (src as usize) * 0x10 + dest as usize
}

/// Logical part (0..16 within a port) to storage slot. Part 10 (index 9)
/// lives in slot 0.
#[inline]
pub fn storage_part(part: usize) -> usize {
  match part & 0x0f {
    p @ 0..=8 => p + 1,
    9 => 0,
    p => p,
  }
}

#[inline]
pub fn logical_part(storage: usize) -> usize {
  match storage & 0x0f {
    0 => 9,
    s @ 1..=9 => s - 1,
    s => s,
  }
}
