use std::path::PathBuf;

use thiserror::Error;

/// Startup and I/O failures. Nothing in here is produced on the audio path.
#[derive(Debug, Error)]
pub enum Error {
  #[error("failed to read ROM file {path}: {source}")]
  RomIo { path: PathBuf, source: std::io::Error },
  #[error("invalid {kind} ROM size: {size} bytes")]
  RomSize { kind: &'static str, size: usize },
  #[error("inconsistent ROM content: {0}")]
  RomContent(String),
  #[error("audio device: {0}")]
  AudioDevice(String),
  #[error("unsupported sample format: {0}")]
  UnsupportedFormat(String),
  #[error("config: {0}")]
  Config(String),
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Wav(#[from] hound::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a SysEx frame is dropped. These are runtime-transient: the caller
/// logs them and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SysExError {
  #[error("not a complete F0..F7 frame")]
  NotSysEx,
  #[error("frame of {0} bytes exceeds the 1024 byte limit")]
  TooLong(usize),
  #[error("data byte {0:02X}h has the high bit set")]
  BadDataByte(u8),
  #[error("checksum mismatch (expected {expected:02X}h, got {got:02X}h)")]
  Checksum { expected: u8, got: u8 },
  #[error("device ID {0:02X}h does not match")]
  WrongDevice(u8),
  #[error("address {address:06X}h (+{len}) is outside the parameter map")]
  UnknownAddress { address: u32, len: usize },
  #[error("unsupported message")]
  Unsupported,
}
