use serde::{Deserialize, Serialize};

/// A parsed channel or system real-time message. SysEx frames travel
/// separately as complete byte slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
  NoteOff { channel: u8, key: u8, velocity: u8 },
  NoteOn { channel: u8, key: u8, velocity: u8 },
  PolyPressure { channel: u8, key: u8, value: u8 },
  ControlChange { channel: u8, controller: u8, value: u8 },
  ProgramChange { channel: u8, program: u8 },
  ChannelPressure { channel: u8, value: u8 },
  /// 14-bit, 8192 = centre.
  PitchBend { channel: u8, value: u16 },
  ActiveSensing,
  SystemReset,
  /// Clock, start/stop and the like; nothing for the tone generator.
  Realtime(u8),
}

impl MidiMessage {
  /// Parses a 1 to 3 byte message. Returns `None` for data bytes in status
  /// position and for system common messages.
  pub fn parse(status: u8, d1: u8, d2: u8) -> Option<Self> {
    let (d1, d2) = (d1 & 0x7f, d2 & 0x7f);
    let channel = status & 0x0f;
    let msg = match status & 0xf0 {
      0x80 => MidiMessage::NoteOff { channel, key: d1, velocity: d2 },
      // Velocity 0 is a note-off.
      0x90 if d2 == 0 => MidiMessage::NoteOff { channel, key: d1, velocity: 0x40 },
      0x90 => MidiMessage::NoteOn { channel, key: d1, velocity: d2 },
      0xa0 => MidiMessage::PolyPressure { channel, key: d1, value: d2 },
      0xb0 => MidiMessage::ControlChange { channel, controller: d1, value: d2 },
      0xc0 => MidiMessage::ProgramChange { channel, program: d1 },
      0xd0 => MidiMessage::ChannelPressure { channel, value: d1 },
      0xe0 => MidiMessage::PitchBend { channel, value: ((d2 as u16) << 7) | d1 as u16 },
      0xf0 => match status {
        0xfe => MidiMessage::ActiveSensing,
        0xff => MidiMessage::SystemReset,
        0xf8..=0xfd => MidiMessage::Realtime(status),
        _ => return None,
      },
      _ => return None,
    };
    Some(msg)
  }

  pub fn channel(&self) -> Option<u8> {
    match *self {
      MidiMessage::NoteOff { channel, .. }
      | MidiMessage::NoteOn { channel, .. }
      | MidiMessage::PolyPressure { channel, .. }
      | MidiMessage::ControlChange { channel, .. }
      | MidiMessage::ProgramChange { channel, .. }
      | MidiMessage::ChannelPressure { channel, .. }
      | MidiMessage::PitchBend { channel, .. } => Some(channel),
      _ => None,
    }
  }
}
