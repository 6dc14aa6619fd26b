//! Orchestration of the two monitoring pipelines.
//!
//! - The **log pipeline** locates the log directory, tails it, classifies each
//!   line and drives the [`SessionStateMachine`].
//! - The **notification pipeline** runs the [`NotificationSubscriber`].
//!
//! Both run as separate tokio tasks sharing only the audio backend. A failure
//! in one is logged and leaves the other running. When both have finished the
//! ambience loop is stopped.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{fire, AudioBackend, AudioCall};
use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::locator::LogLocator;
use crate::session::{apply, SessionStateMachine};
use crate::subscriber::{NotificationSubscriber, ReconnectPolicy, SubscriberConfig};
use crate::tailer::{LogTailer, TailEvent, TailerConfig};
use crate::types::SessionState;

/// Runs the log and notification pipelines.
pub struct Monitor {
    config: Config,
    audio: Arc<dyn AudioBackend>,
}

impl Monitor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(config: Config, audio: Arc<dyn AudioBackend>) -> Self {
        Self { config, audio }
    }

    /// Tailer settings derived from the configuration.
    #[must_use]
    pub fn tailer_config(&self) -> TailerConfig {
        TailerConfig {
            scan_interval: self.config.scan_interval,
            max_empty_scans: self.config.max_empty_scans,
        }
    }

    /// Subscriber settings derived from the configuration.
    #[must_use]
    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig::new(
            self.config.pipeline_url.clone(),
            self.config.user_agent.clone(),
        )
        .with_policy(ReconnectPolicy::fixed(self.config.reconnect_backoff))
    }

    /// Runs both pipelines until `cancel` fires or both have ended.
    ///
    /// `token` is the pipeline access token; without one only the log
    /// pipeline runs.
    pub async fn run(&self, token: Option<String>, cancel: CancellationToken) {
        let locator = LogLocator::with_override(self.config.log_dir.clone());
        let tailer_config = self.tailer_config();
        let log_audio = Arc::clone(&self.audio);
        let log_cancel = cancel.clone();

        let log_task = tokio::spawn(async move {
            let Some(dir) = locator.locate() else {
                return Err(MonitorError::LogDirectoryNotFound);
            };
            run_log_pipeline(dir, tailer_config, log_audio, log_cancel).await
        });

        let subscriber =
            NotificationSubscriber::new(self.subscriber_config(), token, Arc::clone(&self.audio));
        let notify_task = tokio::spawn(subscriber.run(cancel.clone()));

        let (log_result, notify_result) = tokio::join!(log_task, notify_task);

        match log_result {
            Ok(Ok(state)) => debug!(state = ?state, "Log pipeline stopped"),
            Ok(Err(e)) => error!(error = %e, "Log pipeline failed"),
            Err(e) => error!(error = %e, "Log pipeline task panicked"),
        }
        match notify_result {
            Ok(Ok(())) => debug!("Notification pipeline stopped"),
            Ok(Err(e)) => error!(error = %e, "Notification pipeline failed"),
            Err(e) => error!(error = %e, "Notification pipeline task panicked"),
        }

        fire(self.audio.as_ref(), AudioCall::StopLoop);
        info!("Monitor stopped");
    }
}

/// Tails `dir`, classifies lines and applies session effects to `audio`.
///
/// Returns the final session state once the tailer stops.
///
/// # Errors
///
/// Returns an error if the log directory cannot be read or the tailer task
/// panics.
pub async fn run_log_pipeline(
    dir: PathBuf,
    config: TailerConfig,
    audio: Arc<dyn AudioBackend>,
    cancel: CancellationToken,
) -> Result<SessionState> {
    let (mut rx, handle) = LogTailer::new(dir, config).spawn(cancel);
    let classifier = Classifier::default();
    let mut machine = SessionStateMachine::new();

    while let Some(event) = rx.recv().await {
        match event {
            TailEvent::FileOpened(path) => {
                info!(path = %path.display(), "Tailing log file");
                apply(&machine.on_file_opened(), audio.as_ref());
            }
            TailEvent::Line(line) => {
                let Some(event) = classifier.classify(&line.text) else {
                    continue;
                };
                info!(kind = %event.kind, payload = %event.payload, "Log event");
                apply(&machine.handle(&event), audio.as_ref());
            }
        }
    }

    match handle.await? {
        Ok(()) => Ok(machine.state()),
        Err(e) => {
            warn!(error = %e, "Log tailer stopped with error");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Clip, RecordingAudio};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(log_dir: Option<PathBuf>) -> Config {
        Config {
            log_dir,
            audio_dir: PathBuf::from("Audio"),
            data_dir: PathBuf::from("data"),
            api_url: "http://127.0.0.1:1".to_string(),
            pipeline_url: "ws://127.0.0.1:1/".to_string(),
            user_agent: "test".to_string(),
            scan_interval: Duration::from_millis(10),
            max_empty_scans: 3,
            reconnect_backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_derived_configs() {
        let monitor = Monitor::new(test_config(None), Arc::new(RecordingAudio::new()));

        let tailer = monitor.tailer_config();
        assert_eq!(tailer.scan_interval, Duration::from_millis(10));
        assert_eq!(tailer.max_empty_scans, 3);

        let subscriber = monitor.subscriber_config();
        assert_eq!(subscriber.pipeline_url, "ws://127.0.0.1:1/");
        assert_eq!(subscriber.policy.backoff, Duration::from_millis(10));
        assert_eq!(subscriber.policy.max_attempts, None);
    }

    #[tokio::test]
    async fn test_run_ends_when_both_pipelines_have_nothing_to_do() {
        // Empty log directory and no token: discovery gives up, subscriber skips.
        let dir = TempDir::new().unwrap();
        let audio = RecordingAudio::new();
        let monitor = Monitor::new(
            test_config(Some(dir.path().to_path_buf())),
            Arc::new(audio.clone()),
        );

        tokio::time::timeout(Duration::from_secs(5), monitor.run(None, CancellationToken::new()))
            .await
            .expect("monitor should stop on its own");

        assert_eq!(audio.calls(), vec![AudioCall::StopLoop]);
    }

    #[tokio::test]
    async fn test_empty_directory_pipeline_returns_initial_state() {
        let dir = TempDir::new().unwrap();
        let audio = RecordingAudio::new();
        let config = TailerConfig {
            scan_interval: Duration::from_millis(5),
            max_empty_scans: 2,
        };

        let state = run_log_pipeline(
            dir.path().to_path_buf(),
            config,
            Arc::new(audio.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(state, SessionState::default());
        assert_eq!(audio.play_count(Clip::Join), 0);
    }
}
