//! Websocket subscriber for the VRChat notification pipeline.
//!
//! The subscriber keeps one websocket open to the pipeline endpoint and plays
//! the notification chime for every `notification` message. It cycles through
//! [`LinkState`]s:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed
//!      ^              |             |
//!      +--- backoff --+-------------+  (close, protocol error, handshake failure)
//! ```
//!
//! Reconnects wait a fixed backoff and, by default, never give up. The current
//! [`NotificationLink`] is published on a watch channel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vrcnotif_monitor::audio::{ClipLibrary, TracingAudio};
//! use vrcnotif_monitor::subscriber::{NotificationSubscriber, SubscriberConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SubscriberConfig::new(
//!         "wss://pipeline.vrchat.cloud/".to_string(),
//!         "VRCNotif/0.1.0".to_string(),
//!     );
//!     let audio = Arc::new(TracingAudio::new(ClipLibrary::new("Audio")));
//!     let subscriber = NotificationSubscriber::new(config, Some("authcookie_...".to_string()), audio);
//!
//!     subscriber.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, InvalidHeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::audio::{AudioBackend, Clip};
use crate::config::DEFAULT_RECONNECT_SECS;
use crate::session::{apply, Effect};
use crate::types::{Event, EventKind, LinkState, NotificationLink};

/// Query parameter carrying the access token.
const AUTH_TOKEN_PARAM: &str = "authToken";

/// Pipeline message type that triggers the chime.
const NOTIFICATION_TYPE: &str = "notification";

/// Errors that end the subscriber.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// The pipeline URL could not be parsed.
    #[error("invalid pipeline endpoint {url}: {message}")]
    InvalidEndpoint { url: String, message: String },

    /// The configured user agent is not a valid header value.
    #[error("invalid user agent: {0}")]
    InvalidUserAgent(#[from] InvalidHeaderValue),

    /// A bounded reconnect policy ran out of attempts.
    #[error("max reconnect attempts exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },
}

/// How the subscriber waits between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed wait after every failure.
    pub backoff: Duration,

    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Creates a policy with a fixed backoff and no attempt limit.
    #[must_use]
    pub fn fixed(backoff: Duration) -> Self {
        Self {
            backoff,
            max_attempts: None,
        }
    }

    /// A policy with a very short backoff, for tests.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self::fixed(Duration::from_millis(50))
    }

    /// Sets the attempt limit.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Connection settings for the subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Pipeline base URL, e.g. `wss://pipeline.vrchat.cloud/`.
    pub pipeline_url: String,

    /// Value of the `User-Agent` header sent with the handshake.
    pub user_agent: String,

    /// Reconnect behaviour.
    pub policy: ReconnectPolicy,
}

impl SubscriberConfig {
    /// Creates a configuration with the default reconnect policy.
    #[must_use]
    pub fn new(pipeline_url: String, user_agent: String) -> Self {
        Self {
            pipeline_url,
            user_agent,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Replaces the reconnect policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Builds the subscription URL for `token`.
///
/// # Errors
///
/// Returns [`SubscriberError::InvalidEndpoint`] if `base` is not a valid URL.
pub fn endpoint(base: &str, token: &str) -> Result<Url, SubscriberError> {
    let mut url = Url::parse(base).map_err(|e| SubscriberError::InvalidEndpoint {
        url: base.to_string(),
        message: e.to_string(),
    })?;
    url.query_pairs_mut().append_pair(AUTH_TOKEN_PARAM, token);
    Ok(url)
}

/// Envelope of a pipeline message.
#[derive(Debug, Deserialize)]
struct PipelineMessage {
    #[serde(rename = "type")]
    kind: String,

    /// Usually a JSON document encoded as a string.
    #[serde(default)]
    content: Option<serde_json::Value>,
}

/// The fields of a notification body used for logging.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationContent {
    #[serde(default, rename = "type")]
    kind: Option<String>,

    #[serde(default)]
    sender_username: Option<String>,
}

impl NotificationContent {
    fn decode(content: Option<serde_json::Value>) -> Self {
        let value = match content {
            Some(serde_json::Value::String(raw)) => serde_json::from_str(&raw).ok(),
            Some(value @ serde_json::Value::Object(_)) => Some(value),
            _ => None,
        };
        value
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// Classifies a pipeline text message.
///
/// Returns a [`EventKind::Notification`] event for `notification` messages,
/// with the notification's own type as payload when it can be decoded.
/// Everything else, including frames that are not JSON, is
/// [`EventKind::Other`].
#[must_use]
pub fn classify_message(text: &str) -> Event {
    let Ok(message) = serde_json::from_str::<PipelineMessage>(text) else {
        return Event::new(EventKind::Other, "", text);
    };

    if message.kind != NOTIFICATION_TYPE {
        return Event::new(EventKind::Other, message.kind, text);
    }

    let content = NotificationContent::decode(message.content);
    debug!(
        notification_type = content.kind.as_deref().unwrap_or("unknown"),
        sender = content.sender_username.as_deref().unwrap_or("unknown"),
        "Notification received"
    );
    Event::new(EventKind::Notification, content.kind.unwrap_or_default(), text)
}

/// How a connected session ended.
enum SessionEnd {
    Cancelled,
    Dropped,
}

/// Keeps a websocket subscription to the notification pipeline.
pub struct NotificationSubscriber {
    config: SubscriberConfig,
    token: Option<String>,
    audio: Arc<dyn AudioBackend>,
    link: watch::Sender<NotificationLink>,
}

impl NotificationSubscriber {
    /// Creates a subscriber.
    ///
    /// # Arguments
    ///
    /// * `config` - Endpoint, user agent and reconnect policy
    /// * `token` - Access token; without one the subscriber does not connect
    /// * `audio` - Backend that plays the notification chime
    #[must_use]
    pub fn new(
        config: SubscriberConfig,
        token: Option<String>,
        audio: Arc<dyn AudioBackend>,
    ) -> Self {
        let (link, _) = watch::channel(NotificationLink::default());
        Self {
            config,
            token,
            audio,
            link,
        }
    }

    /// Returns a receiver for link state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<NotificationLink> {
        self.link.subscribe()
    }

    /// Returns the current link state.
    #[must_use]
    pub fn link(&self) -> NotificationLink {
        *self.link.borrow()
    }

    /// Runs the subscription until cancelled.
    ///
    /// Returns immediately if no token was provided.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or user agent is invalid, or if a
    /// bounded [`ReconnectPolicy`] runs out of attempts.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SubscriberError> {
        let Some(token) = self.token.as_deref() else {
            warn!("Auth token not found, notification pipeline disabled");
            return Ok(());
        };

        let url = endpoint(&self.config.pipeline_url, token)?;
        let user_agent = HeaderValue::from_str(&self.config.user_agent)?;

        info!(endpoint = %self.config.pipeline_url, "Starting notification subscriber");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(LinkState::Connecting);
            match self.session(&url, &user_agent, &cancel).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Dropped) => {
                    info!("Notification pipeline closed");
                }
                Err(e) => {
                    warn!(error = %e, "Notification pipeline error");
                }
            }

            self.set_state(LinkState::Disconnected);
            let attempts = self.record_retry();
            if let Some(max) = self.config.policy.max_attempts {
                if attempts > max {
                    return Err(SubscriberError::MaxRetriesExceeded { attempts: max });
                }
            }

            debug!(
                attempt = attempts,
                delay_ms = self.config.policy.backoff.as_millis(),
                "Waiting before reconnect"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.policy.backoff) => {}
            }
        }

        self.set_state(LinkState::Disconnected);
        debug!("Notification subscriber stopped");
        Ok(())
    }

    /// Connects once and processes messages until the connection ends.
    async fn session(
        &self,
        url: &Url,
        user_agent: &HeaderValue,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, tokio_tungstenite::tungstenite::Error> {
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(USER_AGENT, user_agent.clone());

        let (mut ws, response) = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            result = tokio_tungstenite::connect_async(request) => result?,
        };

        debug!(status = response.status().as_u16(), "Pipeline handshake complete");
        self.link.send_modify(|link| {
            link.state = LinkState::Subscribed;
            link.retry_count = 0;
        });
        info!("Subscribed to notification pipeline");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(SessionEnd::Cancelled);
                }
                message = ws.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => self.handle_text(&text),
                // tungstenite queues the pong and flushes it on the next read.
                Some(Ok(Message::Ping(_))) => trace!("Pipeline ping"),
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Pipeline sent close");
                    return Ok(SessionEnd::Dropped);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => return Ok(SessionEnd::Dropped),
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let event = classify_message(text);
        match event.kind {
            EventKind::Notification => {
                apply(&[Effect::Chime(Clip::Notification)], self.audio.as_ref());
            }
            _ => trace!(message_type = %event.payload, "Ignoring pipeline message"),
        }
    }

    fn set_state(&self, state: LinkState) {
        self.link.send_modify(|link| link.state = state);
    }

    /// Increments and returns the retry counter.
    fn record_retry(&self) -> u32 {
        let mut attempts = 0;
        self.link.send_modify(|link| {
            link.retry_count = link.retry_count.saturating_add(1);
            attempts = link.retry_count;
        });
        attempts
    }
}
