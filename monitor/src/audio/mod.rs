//! Audio backend interface and clip catalogue.
//!
//! The monitoring pipelines never talk to an audio device directly. They call
//! an [`AudioBackend`], which must be safe to call concurrently from both the
//! log task and the notification task.
//!
//! Callers treat every backend error as non-fatal: [`fire`] logs it and moves
//! on, so a missing sound file never stops event processing.
//!
//! # Backends
//!
//! - [`TracingAudio`]: logs every request; the default when no output device
//!   support is compiled in.
//! - [`RecordingAudio`]: records every request in order, for tests.
//! - `CpalAudio` (feature `playback`): plays WAV clips on the default output
//!   device.

#[cfg(feature = "playback")]
pub mod playback;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

#[cfg(feature = "playback")]
pub use playback::CpalAudio;

/// Errors reported by audio backends.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The clip's sound file could not be opened or decoded.
    #[error("failed to load clip {clip} from {path}: {source}")]
    ClipLoad {
        clip: Clip,
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// The clip uses a sample format the backend cannot play.
    #[error("unsupported format for clip {clip}: {message}")]
    UnsupportedFormat { clip: Clip, message: String },

    /// No output device is available.
    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    /// The output stream failed.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// A volume outside 0.0..=1.0 was requested.
    #[error("volume out of range: {0}")]
    InvalidVolume(f32),
}

/// Result type for audio backend calls.
pub type Result<T> = std::result::Result<T, AudioError>;

/// Sound clips known to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clip {
    /// A remote player joined.
    Join,
    /// A remote player left.
    Leave,
    /// The client authenticated.
    LoggedIn,
    /// A push notification arrived.
    Notification,
    /// Background loop while out of a room.
    Ambience,
}

impl Clip {
    /// Every clip, in a stable order.
    pub const ALL: [Clip; 5] = [
        Clip::Join,
        Clip::Leave,
        Clip::LoggedIn,
        Clip::Notification,
        Clip::Ambience,
    ];

    /// File name of the clip inside the audio directory.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Join => "Join.wav",
            Self::Leave => "Leave.wav",
            Self::LoggedIn => "LoggedIn.wav",
            Self::Notification => "Notif.wav",
            Self::Ambience => "Ambience.wav",
        }
    }
}

impl fmt::Display for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::LoggedIn => "logged_in",
            Self::Notification => "notification",
            Self::Ambience => "ambience",
        };
        f.write_str(name)
    }
}

/// Maps clips to sound files in a directory.
#[derive(Debug, Clone)]
pub struct ClipLibrary {
    dir: PathBuf,
}

impl ClipLibrary {
    /// Creates a library rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the audio directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of a clip's sound file.
    #[must_use]
    pub fn path(&self, clip: Clip) -> PathBuf {
        self.dir.join(clip.file_name())
    }

    /// Returns the clips whose sound files are missing.
    #[must_use]
    pub fn missing(&self) -> Vec<Clip> {
        Clip::ALL
            .into_iter()
            .filter(|clip| !self.path(*clip).is_file())
            .collect()
    }

    /// Decodes a clip into interleaved `f32` samples.
    ///
    /// # Errors
    ///
    /// Returns [`AudioError::ClipLoad`] if the file cannot be read as WAV.
    pub fn decode(&self, clip: Clip) -> Result<DecodedClip> {
        let path = self.path(clip);
        let load_err = |source| AudioError::ClipLoad {
            clip,
            path: path.clone(),
            source,
        };

        let mut reader = hound::WavReader::open(&path).map_err(load_err)?;
        let spec = reader.spec();

        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(load_err)?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(AudioError::UnsupportedFormat {
                        clip,
                        message: format!("{} bits per sample", spec.bits_per_sample),
                    });
                }
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(load_err)?
            }
        };

        Ok(DecodedClip {
            samples,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
        })
    }
}

/// PCM data of a decoded clip.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClip {
    /// Interleaved samples in `-1.0..=1.0`.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Audio side effects requested by the monitor.
///
/// Implementations must be callable from several tasks at once.
pub trait AudioBackend: Send + Sync {
    /// Plays a clip once, mixed over anything already playing.
    fn play_once(&self, clip: Clip) -> Result<()>;

    /// Starts looping a clip from its beginning, replacing any current loop.
    fn load_loop(&self, clip: Clip) -> Result<()>;

    /// Stops the current loop, if any.
    fn stop_loop(&self) -> Result<()>;

    /// Sets the host application's output volume, `0.0..=1.0`.
    fn set_host_volume(&self, volume: f32) -> Result<()>;
}

/// One call made to an audio backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioCall {
    PlayOnce(Clip),
    LoadLoop(Clip),
    StopLoop,
    SetHostVolume(f32),
}

/// Executes a call on `backend`, logging and discarding any error.
pub fn fire(backend: &dyn AudioBackend, call: AudioCall) {
    let result = match call {
        AudioCall::PlayOnce(clip) => backend.play_once(clip),
        AudioCall::LoadLoop(clip) => backend.load_loop(clip),
        AudioCall::StopLoop => backend.stop_loop(),
        AudioCall::SetHostVolume(volume) => backend.set_host_volume(volume),
    };

    if let Err(e) = result {
        warn!(call = ?call, error = %e, "Audio request failed");
    }
}

/// Validates a host volume request.
pub(crate) fn check_volume(volume: f32) -> Result<()> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(AudioError::InvalidVolume(volume))
    }
}

/// Backend that only logs what it would play.
#[derive(Debug, Clone)]
pub struct TracingAudio {
    library: ClipLibrary,
}

impl TracingAudio {
    /// Creates a logging backend over `library`.
    #[must_use]
    pub fn new(library: ClipLibrary) -> Self {
        Self { library }
    }
}

impl AudioBackend for TracingAudio {
    fn play_once(&self, clip: Clip) -> Result<()> {
        info!(clip = %clip, path = %self.library.path(clip).display(), "Playing clip");
        Ok(())
    }

    fn load_loop(&self, clip: Clip) -> Result<()> {
        info!(clip = %clip, path = %self.library.path(clip).display(), "Looping clip");
        Ok(())
    }

    fn stop_loop(&self) -> Result<()> {
        info!("Stopping loop");
        Ok(())
    }

    fn set_host_volume(&self, volume: f32) -> Result<()> {
        check_volume(volume)?;
        info!(volume, "Setting host volume");
        Ok(())
    }
}

/// Backend that records calls in order.
///
/// Clones share the same call log.
#[derive(Debug, Clone, Default)]
pub struct RecordingAudio {
    calls: Arc<Mutex<Vec<AudioCall>>>,
}

impl RecordingAudio {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<AudioCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Returns how many times `clip` was played once.
    #[must_use]
    pub fn play_count(&self, clip: Clip) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == AudioCall::PlayOnce(clip))
            .count()
    }

    fn record(&self, call: AudioCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl AudioBackend for RecordingAudio {
    fn play_once(&self, clip: Clip) -> Result<()> {
        self.record(AudioCall::PlayOnce(clip));
        Ok(())
    }

    fn load_loop(&self, clip: Clip) -> Result<()> {
        self.record(AudioCall::LoadLoop(clip));
        Ok(())
    }

    fn stop_loop(&self) -> Result<()> {
        self.record(AudioCall::StopLoop);
        Ok(())
    }

    fn set_host_volume(&self, volume: f32) -> Result<()> {
        check_volume(volume)?;
        self.record(AudioCall::SetHostVolume(volume));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FailingAudio;

    impl AudioBackend for FailingAudio {
        fn play_once(&self, clip: Clip) -> Result<()> {
            Err(AudioError::UnsupportedFormat {
                clip,
                message: "test".to_string(),
            })
        }

        fn load_loop(&self, _clip: Clip) -> Result<()> {
            Err(AudioError::Stream("test".to_string()))
        }

        fn stop_loop(&self) -> Result<()> {
            Err(AudioError::Stream("test".to_string()))
        }

        fn set_host_volume(&self, volume: f32) -> Result<()> {
            Err(AudioError::InvalidVolume(volume))
        }
    }

    fn write_wav(path: &Path, spec: hound::WavSpec, samples: &[i16]) {
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for sample in samples {
            writer.write_sample(*sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_clip_file_names() {
        assert_eq!(Clip::Join.file_name(), "Join.wav");
        assert_eq!(Clip::Leave.file_name(), "Leave.wav");
        assert_eq!(Clip::Notification.file_name(), "Notif.wav");
    }

    #[test]
    fn test_library_reports_missing_clips() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Join.wav"), b"").unwrap();

        let library = ClipLibrary::new(dir.path());
        let missing = library.missing();
        assert!(!missing.contains(&Clip::Join));
        assert_eq!(missing.len(), Clip::ALL.len() - 1);
    }

    #[test]
    fn test_decode_int_wav() {
        let dir = TempDir::new().unwrap();
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        write_wav(&dir.path().join("Join.wav"), spec, &[0, 16_384, -32_768, 0]);

        let decoded = ClipLibrary::new(dir.path()).decode(Clip::Join).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 22_050);
        assert_eq!(decoded.samples, vec![0.0, 0.5, -1.0, 0.0]);
    }

    #[test]
    fn test_decode_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ClipLibrary::new(dir.path()).decode(Clip::Leave).unwrap_err();
        assert!(matches!(err, AudioError::ClipLoad { clip: Clip::Leave, .. }));
    }

    #[test]
    fn test_fire_swallows_errors() {
        let backend = FailingAudio;
        fire(&backend, AudioCall::PlayOnce(Clip::Join));
        fire(&backend, AudioCall::LoadLoop(Clip::Ambience));
        fire(&backend, AudioCall::StopLoop);
        fire(&backend, AudioCall::SetHostVolume(0.0));
    }

    #[test]
    fn test_recording_audio_keeps_order() {
        let audio = RecordingAudio::new();
        fire(&audio, AudioCall::SetHostVolume(0.0));
        fire(&audio, AudioCall::LoadLoop(Clip::Ambience));
        fire(&audio, AudioCall::PlayOnce(Clip::Join));

        assert_eq!(
            audio.calls(),
            vec![
                AudioCall::SetHostVolume(0.0),
                AudioCall::LoadLoop(Clip::Ambience),
                AudioCall::PlayOnce(Clip::Join),
            ]
        );
        assert_eq!(audio.play_count(Clip::Join), 1);
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        let audio = RecordingAudio::new();
        assert!(matches!(
            audio.set_host_volume(1.5),
            Err(AudioError::InvalidVolume(_))
        ));
        assert!(audio.calls().is_empty());
    }

    #[test]
    fn test_tracing_audio_accepts_requests() {
        let audio = TracingAudio::new(ClipLibrary::new("Audio"));
        assert!(audio.play_once(Clip::Notification).is_ok());
        assert!(audio.load_loop(Clip::Ambience).is_ok());
        assert!(audio.stop_loop().is_ok());
        assert!(audio.set_host_volume(1.0).is_ok());
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::InvalidVolume(2.0);
        assert_eq!(err.to_string(), "volume out of range: 2");
    }
}
