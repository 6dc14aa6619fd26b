//! Audio output through `cpal`.
//!
//! A dedicated thread owns the output stream, since cpal streams are not
//! `Send` on every platform. The stream callback pulls from a shared
//! [`Mixer`] that sums one-shot voices and the current loop. Clips are
//! decoded once, converted to the device's channel count and sample rate, and
//! cached.
//!
//! Host volume control is per-application and platform specific; requests
//! are validated, recorded and logged.

use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use tracing::{debug, error, info};

use super::{check_volume, AudioBackend, AudioError, Clip, ClipLibrary, DecodedClip, Result};

/// Output format of the opened device.
#[derive(Debug, Clone, Copy)]
struct OutputFormat {
    channels: u16,
    sample_rate: u32,
}

/// A clip being played.
#[derive(Debug)]
struct Voice {
    samples: Arc<Vec<f32>>,
    position: usize,
}

impl Voice {
    fn new(samples: Arc<Vec<f32>>) -> Self {
        Self {
            samples,
            position: 0,
        }
    }
}

/// Sums active voices into output buffers.
#[derive(Debug, Default)]
struct Mixer {
    one_shots: Vec<Voice>,
    looping: Option<Voice>,
}

impl Mixer {
    /// Fills `out` with the next mixed samples and drops finished one-shots.
    fn fill(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        for voice in &mut self.one_shots {
            for slot in out.iter_mut() {
                let Some(sample) = voice.samples.get(voice.position) else {
                    break;
                };
                *slot += sample;
                voice.position += 1;
            }
        }
        self.one_shots.retain(|v| v.position < v.samples.len());

        if let Some(voice) = self.looping.as_mut() {
            if !voice.samples.is_empty() {
                for slot in out.iter_mut() {
                    if voice.position >= voice.samples.len() {
                        voice.position = 0;
                    }
                    *slot += voice.samples[voice.position];
                    voice.position += 1;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }
    }
}

/// Plays clips on the default output device.
pub struct CpalAudio {
    library: ClipLibrary,
    format: OutputFormat,
    mixer: Arc<Mutex<Mixer>>,
    cache: Mutex<HashMap<Clip, Arc<Vec<f32>>>>,
    host_volume: Mutex<f32>,
    /// Dropping this ends the stream thread.
    _shutdown: std_mpsc::Sender<()>,
}

impl CpalAudio {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device exists or the stream cannot start.
    pub fn open(library: ClipLibrary) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<OutputFormat>>();

        let mixer_for_thread = Arc::clone(&mixer);
        thread::Builder::new()
            .name("vrcnotif-audio".to_string())
            .spawn(move || run_output_thread(mixer_for_thread, ready_tx, shutdown_rx))
            .map_err(|e| AudioError::Stream(format!("failed to spawn audio thread: {e}")))?;

        let format = ready_rx
            .recv()
            .map_err(|_| AudioError::Stream("audio thread exited during startup".to_string()))??;

        info!(
            channels = format.channels,
            sample_rate = format.sample_rate,
            dir = %library.dir().display(),
            "Audio output opened"
        );

        Ok(Self {
            library,
            format,
            mixer,
            cache: Mutex::new(HashMap::new()),
            host_volume: Mutex::new(1.0),
            _shutdown: shutdown_tx,
        })
    }

    /// Returns the last host volume requested.
    #[must_use]
    pub fn host_volume(&self) -> f32 {
        self.host_volume.lock().map(|v| *v).unwrap_or(1.0)
    }

    fn samples(&self, clip: Clip) -> Result<Arc<Vec<f32>>> {
        if let Some(samples) = lock(&self.cache)?.get(&clip) {
            return Ok(Arc::clone(samples));
        }

        let decoded = self.library.decode(clip)?;
        let samples = Arc::new(convert(&decoded, self.format));
        debug!(clip = %clip, samples = samples.len(), "Decoded clip");

        lock(&self.cache)?.insert(clip, Arc::clone(&samples));
        Ok(samples)
    }
}

impl AudioBackend for CpalAudio {
    fn play_once(&self, clip: Clip) -> Result<()> {
        let samples = self.samples(clip)?;
        lock(&self.mixer)?.one_shots.push(Voice::new(samples));
        Ok(())
    }

    fn load_loop(&self, clip: Clip) -> Result<()> {
        let samples = self.samples(clip)?;
        lock(&self.mixer)?.looping = Some(Voice::new(samples));
        Ok(())
    }

    fn stop_loop(&self) -> Result<()> {
        lock(&self.mixer)?.looping = None;
        Ok(())
    }

    fn set_host_volume(&self, volume: f32) -> Result<()> {
        check_volume(volume)?;
        *lock(&self.host_volume)? = volume;
        info!(volume, "Host volume requested");
        Ok(())
    }
}

impl Drop for CpalAudio {
    fn drop(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.looping = None;
            mixer.one_shots.clear();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AudioError::Stream("audio state lock poisoned".to_string()))
}

/// Owns the output stream until the shutdown channel closes.
fn run_output_thread(
    mixer: Arc<Mutex<Mixer>>,
    ready: std_mpsc::Sender<Result<OutputFormat>>,
    shutdown: std_mpsc::Receiver<()>,
) {
    let stream = match open_stream(mixer) {
        Ok((stream, format)) => {
            let _ = ready.send(Ok(format));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Blocks until every sender is dropped.
    while shutdown.recv().is_ok() {}

    drop(stream);
    debug!("Audio output closed");
}

fn open_stream(mixer: Arc<Mutex<Mixer>>) -> Result<(cpal::Stream, OutputFormat)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("default output".to_string()))?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioError::Stream(format!("failed to get default config: {e}")))?;

    let format = OutputFormat {
        channels: config.channels(),
        sample_rate: config.sample_rate().0,
    };

    let stream = match config.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), mixer)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), mixer)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), mixer)?,
        other => {
            return Err(AudioError::Stream(format!(
                "unsupported output sample format: {other:?}"
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::Stream(format!("failed to start stream: {e}")))?;

    Ok((stream, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                scratch.resize(data.len(), 0.0);
                match mixer.lock() {
                    Ok(mut mixer) => mixer.fill(&mut scratch),
                    Err(_) => scratch.fill(0.0),
                }
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(*sample);
                }
            },
            |err| error!("audio stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::Stream(format!("failed to build stream: {e}")))
}

/// Converts a clip to the output format with nearest-sample resampling.
fn convert(clip: &DecodedClip, format: OutputFormat) -> Vec<f32> {
    let in_channels = usize::from(clip.channels.max(1));
    let out_channels = usize::from(format.channels.max(1));
    let in_frames = clip.samples.len() / in_channels;
    if in_frames == 0 || clip.sample_rate == 0 {
        return Vec::new();
    }

    let ratio = f64::from(clip.sample_rate) / f64::from(format.sample_rate.max(1));
    let out_frames = (in_frames as f64 / ratio).floor() as usize;

    let mut out = Vec::with_capacity(out_frames * out_channels);
    for frame in 0..out_frames {
        let src_frame = ((frame as f64 * ratio) as usize).min(in_frames - 1);
        for channel in 0..out_channels {
            let src_channel = channel % in_channels;
            out.push(clip.samples[src_frame * in_channels + src_channel]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_sums_and_drops_finished_one_shots() {
        let mut mixer = Mixer::default();
        mixer.one_shots.push(Voice::new(Arc::new(vec![0.25, 0.25])));
        mixer.one_shots.push(Voice::new(Arc::new(vec![0.5])));

        let mut out = [0.0f32; 3];
        mixer.fill(&mut out);

        assert_eq!(out, [0.75, 0.25, 0.0]);
        assert!(mixer.one_shots.is_empty());
    }

    #[test]
    fn test_mixer_loops_from_start() {
        let mut mixer = Mixer {
            looping: Some(Voice::new(Arc::new(vec![0.1, 0.2]))),
            ..Mixer::default()
        };

        let mut out = [0.0f32; 5];
        mixer.fill(&mut out);
        assert_eq!(out, [0.1, 0.2, 0.1, 0.2, 0.1]);
    }

    #[test]
    fn test_mixer_clamps() {
        let mut mixer = Mixer::default();
        mixer.one_shots.push(Voice::new(Arc::new(vec![0.9])));
        mixer.one_shots.push(Voice::new(Arc::new(vec![0.9])));

        let mut out = [0.0f32; 1];
        mixer.fill(&mut out);
        assert_eq!(out, [1.0]);
    }

    #[test]
    fn test_convert_mono_to_stereo_same_rate() {
        let clip = DecodedClip {
            samples: vec![0.1, 0.2],
            channels: 1,
            sample_rate: 48_000,
        };
        let out = convert(
            &clip,
            OutputFormat {
                channels: 2,
                sample_rate: 48_000,
            },
        );
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_convert_upsamples() {
        let clip = DecodedClip {
            samples: vec![0.1, 0.2],
            channels: 1,
            sample_rate: 24_000,
        };
        let out = convert(
            &clip,
            OutputFormat {
                channels: 1,
                sample_rate: 48_000,
            },
        );
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }
}
