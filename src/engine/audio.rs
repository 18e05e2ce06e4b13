use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use dasp::Sample;
use log::{debug, error, info, warn};
use thiserror::Error;

use super::synth::{next_frame, SynthHandle};
use crate::error::{Error, Result};

// How long the pull thread waits on a full or suspended device before
// looking again.
const POLL: Duration = Duration::from_millis(2);

/// Configured buffer and period times are in microseconds.
pub fn us_to_frames(us: u32, sample_rate: u32) -> usize {
  (us as u64 * sample_rate as u64 / 1_000_000).max(1) as usize
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
  #[error("buffer under-run")]
  Underrun,
  #[error("device suspended")]
  Suspended,
  #[error("{0}")]
  Other(String),
}

/// Interleaved signed 16-bit sink fed by [`PullDriver`]. `write` may block
/// until the device has room; `Ok(0)` means try again later.
pub trait PcmDevice: Send {
  fn channels(&self) -> usize;
  fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, DeviceError>;
  /// Recovers from an under-run.
  fn prepare(&mut self) -> std::result::Result<(), DeviceError>;
  /// Leaves the suspended state; `Err(Suspended)` while still suspended.
  fn resume(&mut self) -> std::result::Result<(), DeviceError>;
}

/// Dedicated thread pulling one period at a time from the synth and pushing
/// it into a [`PcmDevice`].
pub struct PullDriver<D: PcmDevice + 'static> {
  quit: Arc<AtomicBool>,
  wake: Sender<()>,
  thread: Option<JoinHandle<D>>,
}

impl<D: PcmDevice + 'static> PullDriver<D> {
  pub fn start(synth: SynthHandle, device: D, period_frames: usize) -> Result<Self> {
    let quit = Arc::new(AtomicBool::new(false));
    let (wake, woken) = bounded(1);
    let q = quit.clone();
    let period = period_frames.max(1);
    let thread = thread::Builder::new()
      .name("soundcanvas-audio".into())
      .spawn(move || pull_loop(synth, device, period, q, woken))?;
    debug!("pull driver started, {period} frames per period");
    Ok(Self { quit, wake, thread: Some(thread) })
  }

  pub fn is_running(&self) -> bool {
    self.thread.as_ref().is_some_and(|t| !t.is_finished())
  }

  /// Stops and joins the thread, handing the device back.
  pub fn stop(mut self) -> Option<D> { self.shutdown() }

  fn shutdown(&mut self) -> Option<D> {
    let thread = self.thread.take()?;
    self.quit.store(true, Ordering::Release);
    let _ = self.wake.try_send(());
    match thread.join() {
      Ok(device) => Some(device),
      Err(_) => {
        error!("audio thread panicked");
        None
      }
    }
  }
}

impl<D: PcmDevice + 'static> Drop for PullDriver<D> {
  fn drop(&mut self) { self.shutdown(); }
}

fn pull_loop<D: PcmDevice>(synth: SynthHandle, mut device: D, period: usize, quit: Arc<AtomicBool>, woken: Receiver<()>) -> D {
  let channels = device.channels().max(1);
  let mut buf = vec![0i16; period * channels];
  let mut reported = false;

  'run: while !quit.load(Ordering::Acquire) {
    let mut faults = 0usize;
    for frame in buf.chunks_exact_mut(channels) {
      if !next_frame(&synth, frame) { faults += 1; }
    }
    if faults > 0 && !reported {
      error!("synth unavailable, writing silence");
      reported = true;
    }

    let mut written = 0;
    while written < period {
      if quit.load(Ordering::Acquire) { break 'run; }
      match device.write(&buf[written * channels..]) {
        Ok(0) => { let _ = woken.recv_timeout(POLL); }
        Ok(n) => written += n,
        Err(DeviceError::Underrun) => {
          warn!("audio under-run, re-preparing device");
          if let Err(e) = device.prepare() {
            error!("audio device prepare failed: {e}");
            break 'run;
          }
        }
        Err(DeviceError::Suspended) => loop {
          if quit.load(Ordering::Acquire) { break 'run; }
          match device.resume() {
            Ok(()) => break,
            Err(DeviceError::Suspended) => { let _ = woken.recv_timeout(POLL); }
            Err(_) => {
              if let Err(e) = device.prepare() {
                error!("audio device prepare failed: {e}");
                break 'run;
              }
              break;
            }
          }
        },
        Err(DeviceError::Other(e)) => {
          error!("audio device: {e}");
          break 'run;
        }
      }
    }
  }
  debug!("audio thread exiting");
  device
}

/// Writes a fixed number of frames to a 16-bit WAV file, then signals the
/// receiver returned by [`WavDevice::create`].
pub struct WavDevice {
  writer: Option<hound::WavWriter<BufWriter<File>>>,
  channels: usize,
  remaining: usize,
  done: Option<Sender<()>>,
}

impl WavDevice {
  pub fn create(path: &Path, sample_rate: u32, channels: u16, frames: usize) -> Result<(Self, Receiver<()>)> {
    let spec = hound::WavSpec { channels, sample_rate, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };
    let writer = hound::WavWriter::create(path, spec)?;
    let (tx, rx) = bounded(1);
    let dev = Self { writer: Some(writer), channels: channels.max(1) as usize, remaining: frames, done: Some(tx) };
    Ok((dev, rx))
  }

  pub fn finalize(mut self) -> Result<()> {
    if let Some(w) = self.writer.take() { w.finalize()?; }
    Ok(())
  }
}

impl PcmDevice for WavDevice {
  fn channels(&self) -> usize { self.channels }

  fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, DeviceError> {
    let n = (frames.len() / self.channels).min(self.remaining);
    let Some(writer) = self.writer.as_mut() else { return Ok(0) };
    for &s in &frames[..n * self.channels] {
      writer.write_sample(s).map_err(|e| DeviceError::Other(e.to_string()))?;
    }
    self.remaining -= n;
    if self.remaining == 0 {
      if let Some(tx) = self.done.take() { let _ = tx.send(()); }
    }
    Ok(n)
  }

  fn prepare(&mut self) -> std::result::Result<(), DeviceError> { Ok(()) }
  fn resume(&mut self) -> std::result::Result<(), DeviceError> { Ok(()) }
}

/// Device-callback output: cpal owns the thread and asks for frames.
pub struct CpalOutput {
  stream: cpal::Stream,
  sample_rate: u32,
  channels: usize,
}

impl CpalOutput {
  /// Opens the default output device, tells the synth the negotiated format
  /// and starts the stream.
  pub fn open(synth: SynthHandle, preferred_rate: u32, buffer_frames: u32) -> Result<Self> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or_else(|| Error::AudioDevice("no output device".into()))?;
    let supported = choose_config(&device, preferred_rate)?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    match synth.lock() {
      Ok(mut s) => s.set_audio_format(sample_rate, channels),
      Err(_) => return Err(Error::AudioDevice("synth lock poisoned".into())),
    }

    let mut cfg: cpal::StreamConfig = supported.config();
    cfg.buffer_size = cpal::BufferSize::Fixed(buffer_frames);
    let stream = match supported.sample_format() {
      cpal::SampleFormat::F32 => build_stream::<f32>(&device, &cfg, synth)?,
      cpal::SampleFormat::I16 => build_stream::<i16>(&device, &cfg, synth)?,
      cpal::SampleFormat::U16 => build_stream::<u16>(&device, &cfg, synth)?,
      other => return Err(Error::UnsupportedFormat(format!("{other:?}"))),
    };
    stream.play().map_err(|e| Error::AudioDevice(e.to_string()))?;
    info!(
      "audio out: {} @ {sample_rate} Hz, {channels} ch, {:?}, {buffer_frames} frames",
      device.name().unwrap_or_default(), supported.sample_format()
    );
    Ok(Self { stream, sample_rate, channels })
  }

  pub fn sample_rate(&self) -> u32 { self.sample_rate }
  pub fn channels(&self) -> usize { self.channels }
}

// Stereo only; the preferred rate first, then 44.1k and 48k, then whatever
// the device tops out at.
fn choose_config(device: &cpal::Device, preferred: u32) -> Result<cpal::SupportedStreamConfig> {
  use cpal::SampleFormat::{F32, I16, U16};
  let ranges: Vec<cpal::SupportedStreamConfigRange> = device
    .supported_output_configs()
    .map_err(|e| Error::AudioDevice(e.to_string()))?
    .filter(|r| r.channels() == 2)
    .collect();
  for sr in [preferred, 44_100, 48_000] {
    for fmt in [F32, I16] {
      let hit = ranges
        .iter()
        .find(|r| r.sample_format() == fmt && r.min_sample_rate().0 <= sr && r.max_sample_rate().0 >= sr);
      if let Some(r) = hit {
        return Ok(r.clone().with_sample_rate(cpal::SampleRate(sr)));
      }
    }
  }
  if let Some(r) = ranges.into_iter().find(|r| matches!(r.sample_format(), F32 | I16 | U16)) {
    return Ok(r.with_max_sample_rate());
  }
  device.default_output_config().map_err(|e| Error::AudioDevice(e.to_string()))
}

fn build_stream<T>(device: &cpal::Device, cfg: &cpal::StreamConfig, synth: SynthHandle) -> Result<cpal::Stream>
where
  T: cpal::SizedSample + cpal::FromSample<i16>,
{
  let channels = cfg.channels as usize;
  let mut frame = vec![0i16; channels];
  let mut reported = false;
  let err_fn = |e: cpal::StreamError| warn!("stream error: {e}");
  device
    .build_output_stream(
      cfg,
      move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let mut faults = 0usize;
        for out in data.chunks_mut(channels) {
          if !next_frame(&synth, &mut frame) { faults += 1; }
          for (o, &s) in out.iter_mut().zip(frame.iter()) { *o = s.to_sample::<T>(); }
        }
        if faults > 0 && !reported {
          error!("synth unavailable, {faults} silent frames");
          reported = true;
        }
      },
      err_fn,
      None,
    )
    .map_err(|e| Error::AudioDevice(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::rom::SynthGen;
  use crate::test_support::synth;
  use std::sync::Mutex;
  use std::time::Instant;

  const PERIOD: usize = 256;

  #[derive(Default)]
  struct Log {
    samples: Vec<i16>,
    underruns: u32,
    prepared: Option<Instant>,
    first_write_after: Option<Instant>,
    suspended_polls: u32,
  }

  // Accepts everything, except that once `starve_at` frames are in it
  // stalls for 200 ms and reports an under-run (or a suspend).
  struct MockDevice {
    log: Arc<Mutex<Log>>,
    starve_at: usize,
    suspend: bool,
    target: usize,
    done: Option<Sender<()>>,
  }

  impl PcmDevice for MockDevice {
    fn channels(&self) -> usize { 2 }

    fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, DeviceError> {
      let mut log = self.log.lock().unwrap();
      if log.samples.len() / 2 >= self.starve_at && log.underruns == 0 {
        log.underruns += 1;
        drop(log);
        thread::sleep(Duration::from_millis(200));
        return Err(if self.suspend { DeviceError::Suspended } else { DeviceError::Underrun });
      }
      if log.prepared.is_some() && log.first_write_after.is_none() {
        log.first_write_after = Some(Instant::now());
      }
      log.samples.extend_from_slice(frames);
      if log.samples.len() / 2 >= self.target {
        if let Some(tx) = self.done.take() { let _ = tx.send(()); }
      }
      Ok(frames.len() / 2)
    }

    fn prepare(&mut self) -> std::result::Result<(), DeviceError> {
      self.log.lock().unwrap().prepared = Some(Instant::now());
      Ok(())
    }

    fn resume(&mut self) -> std::result::Result<(), DeviceError> {
      let mut log = self.log.lock().unwrap();
      log.suspended_polls += 1;
      if log.suspended_polls < 3 { return Err(DeviceError::Suspended); }
      log.prepared = Some(Instant::now());
      Ok(())
    }
  }

  fn longest_silence(samples: &[i16]) -> usize {
    let (mut run, mut best) = (0, 0);
    for f in samples.chunks_exact(2) {
      if f[0] == 0 && f[1] == 0 { run += 1 } else { run = 0 }
      best = best.max(run);
    }
    best
  }

  fn run_starved(suspend: bool) -> Log {
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(32000, 2);
    s.midi_input(0x90, 60, 127);
    let handle = s.into_handle();
    let log = Arc::new(Mutex::new(Log::default()));
    let (tx, rx) = bounded(1);
    let dev = MockDevice { log: log.clone(), starve_at: 4 * PERIOD, suspend, target: 16 * PERIOD, done: Some(tx) };
    let driver = PullDriver::start(handle, dev, PERIOD).unwrap();
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(driver.stop().is_some());
    Arc::try_unwrap(log).ok().unwrap().into_inner().unwrap()
  }

  #[test]
  fn recovers_from_underrun() {
    let log = run_starved(false);
    assert_eq!(log.underruns, 1);
    let (prepared, resumed) = (log.prepared.unwrap(), log.first_write_after.unwrap());
    assert!(resumed.duration_since(prepared) < Duration::from_millis(50));
    assert!(longest_silence(&log.samples) <= PERIOD);
  }

  #[test]
  fn polls_resume_after_suspend() {
    let log = run_starved(true);
    assert_eq!(log.suspended_polls, 3);
    assert!(log.first_write_after.is_some());
    assert!(longest_silence(&log.samples) <= PERIOD);
  }

  #[test]
  fn stop_joins_an_idle_driver() {
    let handle = synth(SynthGen::SC55).into_handle();
    let dir = tempfile::tempdir().unwrap();
    // Zero frames: the device is full from the start.
    let (dev, _done) = WavDevice::create(&dir.path().join("idle.wav"), 32000, 2, 0).unwrap();
    let driver = PullDriver::start(handle, dev, 64).unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(driver.is_running());
    let dev = driver.stop().unwrap();
    dev.finalize().unwrap();
  }

  #[test]
  fn renders_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("note.wav");
    let mut s = synth(SynthGen::SC55);
    s.set_audio_format(32000, 2);
    s.midi_input(0x90, 60, 127);
    let (dev, done) = WavDevice::create(&path, 32000, 2, 8000).unwrap();
    let driver = PullDriver::start(s.into_handle(), dev, us_to_frames(25_000, 32000)).unwrap();
    done.recv_timeout(Duration::from_secs(10)).unwrap();
    driver.stop().unwrap().finalize().unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!((spec.channels, spec.sample_rate, spec.bits_per_sample), (2, 32000, 16));
    assert_eq!(reader.len(), 16000);
    let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
    assert!(samples.iter().any(|&v| v.unsigned_abs() > 1000));
  }

  #[test]
  fn period_conversion() {
    assert_eq!(us_to_frames(25_000, 44_100), 1102);
    assert_eq!(us_to_frames(75_000, 32_000), 2400);
  }
}
