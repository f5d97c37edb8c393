//! Observability events for the SKR events listener.
//!
//! The listener publishes a [`ListenerEvent`] at each step of its lifecycle and
//! of every request it handles. Subscribers attach to the [`EventBus`]; the
//! bundled [`EventLogger`] writes the events to the console, a file, or a
//! custom sink in plain or structured (JSON) form.
//!
//! # Example
//!
//! ```no_run
//! use skr_listener::event::{EventLoggerConfig, LogDestination};
//! use skr_listener::{ListenerConfig, SkrEventsListener};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ListenerConfig::default();
//!     config.event_logger = Some(EventLoggerConfig {
//!         destination: LogDestination::File {
//!             path: "./logs/skr-listener.log".to_string(),
//!             max_size: Some(10 * 1024 * 1024),
//!         },
//!         structured: true,
//!         log_level: tracing::Level::INFO,
//!     });
//!
//!     let (listener, _events) = SkrEventsListener::new(config)?;
//!     listener.start(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use tracing::{debug, error, info, trace, warn, Level};
use warp::http::StatusCode;

/// Listener event types.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// Server started event
    ServerStarted {
        /// The address the server is bound to
        address: String,
    },

    /// Server stopped event
    ServerStopped,

    /// Request received event
    RequestReceived {
        /// The HTTP method
        method: String,
        /// The request path
        path: String,
        /// The timestamp when the request was received
        timestamp: DateTime<Utc>,
    },

    /// A change notification was taken by the consumer
    EventDispatched {
        /// Namespace of the changed resource
        namespace: String,
        /// Name of the changed resource
        name: String,
    },

    /// A request was answered with an error
    RequestFailed {
        /// Failure classification, e.g. `routing_error` or `dispatch_error`
        error_type: String,
        /// The message returned to the caller
        message: String,
    },

    /// Response sent event
    ResponseSent {
        /// The HTTP status code
        status: StatusCode,
        /// The time it took to process the request in milliseconds
        duration_ms: u64,
    },
}

impl ListenerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListenerEvent::ServerStarted { .. } => "server_started",
            ListenerEvent::ServerStopped => "server_stopped",
            ListenerEvent::RequestReceived { .. } => "request_received",
            ListenerEvent::EventDispatched { .. } => "event_dispatched",
            ListenerEvent::RequestFailed { .. } => "request_failed",
            ListenerEvent::ResponseSent { .. } => "response_sent",
        }
    }
}

/// Where event logs should be sent
#[derive(Clone)]
pub enum LogDestination {
    /// Log through `tracing`
    Console,

    /// Append to a file, rotating it to `<path>.1` once it reaches `max_size`
    File {
        /// Path to the log file
        path: String,

        /// Maximum file size in bytes before rotation
        max_size: Option<u64>,
    },

    /// Custom logging function
    Custom(Arc<dyn Fn(&str) + Send + Sync>),
}

impl fmt::Debug for LogDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogDestination::Console => write!(f, "LogDestination::Console"),
            LogDestination::File { path, max_size } => f
                .debug_struct("LogDestination::File")
                .field("path", path)
                .field("max_size", max_size)
                .finish(),
            LogDestination::Custom(_) => write!(f, "LogDestination::Custom(<function>)"),
        }
    }
}

/// Configuration for the event logger
///
/// Only console and file destinations have a serialized form; serializing a
/// [`LogDestination::Custom`] sink fails.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "EventLoggerSettings")]
pub struct EventLoggerConfig {
    /// Where to send the log output
    pub destination: LogDestination,

    /// Whether to use structured (JSON) logging
    pub structured: bool,

    /// The log level used for console output
    pub log_level: Level,
}

impl Default for EventLoggerConfig {
    fn default() -> Self {
        Self {
            destination: LogDestination::File {
                path: "./logs/skr-listener.log".to_string(),
                max_size: Some(10 * 1024 * 1024),
            },
            structured: true,
            log_level: Level::INFO,
        }
    }
}

/// Flat serialized form of [`EventLoggerConfig`].
#[derive(Serialize, Deserialize)]
struct EventLoggerSettings {
    destination_type: String,
    #[serde(default)]
    destination_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_size: Option<u64>,
    #[serde(default = "default_structured")]
    structured: bool,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_structured() -> bool {
    true
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl TryFrom<&EventLoggerConfig> for EventLoggerSettings {
    type Error = String;

    fn try_from(config: &EventLoggerConfig) -> Result<Self, Self::Error> {
        let (destination_type, destination_path, max_size) = match &config.destination {
            LogDestination::Console => ("console", String::new(), None),
            LogDestination::File { path, max_size } => ("file", path.clone(), *max_size),
            LogDestination::Custom(_) => {
                return Err("custom log destinations cannot be serialized".to_string())
            }
        };

        Ok(Self {
            destination_type: destination_type.to_string(),
            destination_path,
            max_size,
            structured: config.structured,
            log_level: config.log_level.to_string(),
        })
    }
}

impl Serialize for EventLoggerConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        EventLoggerSettings::try_from(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl TryFrom<EventLoggerSettings> for EventLoggerConfig {
    type Error = String;

    fn try_from(settings: EventLoggerSettings) -> Result<Self, Self::Error> {
        let destination = match settings.destination_type.as_str() {
            "console" => LogDestination::Console,
            "file" if !settings.destination_path.is_empty() => LogDestination::File {
                path: settings.destination_path,
                max_size: settings.max_size,
            },
            "file" => return Err("file destination requires destination_path".to_string()),
            other => return Err(format!("unsupported log destination '{}'", other)),
        };

        let log_level = settings
            .log_level
            .parse::<Level>()
            .map_err(|e| format!("invalid log level '{}': {}", settings.log_level, e))?;

        Ok(Self {
            destination,
            structured: settings.structured,
            log_level,
        })
    }
}

/// Receives listener events published on an [`EventBus`].
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Handle a listener event
    async fn handle_event(&self, event: ListenerEvent);
}

/// Event bus for the listener
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to listener events
    pub fn subscribe<S>(&self, subscriber: S) -> Arc<dyn EventSubscriber>
    where
        S: EventSubscriber + 'static,
    {
        let subscriber: Arc<dyn EventSubscriber> = Arc::new(subscriber);
        self.lock_subscribers().push(subscriber.clone());
        subscriber
    }

    /// Remove a subscriber from the event bus
    pub fn unsubscribe(&self, subscriber: &Arc<dyn EventSubscriber>) {
        self.lock_subscribers()
            .retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Publish a server started event
    pub async fn publish_server_started(&self, address: String) {
        self.publish_event(ListenerEvent::ServerStarted { address })
            .await;
    }

    /// Publish a server stopped event
    pub async fn publish_server_stopped(&self) {
        self.publish_event(ListenerEvent::ServerStopped).await;
    }

    /// Publish a request received event
    pub async fn publish_request_received(&self, method: String, path: String) {
        self.publish_event(ListenerEvent::RequestReceived {
            method,
            path,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Publish an event dispatched event
    pub async fn publish_event_dispatched(&self, namespace: String, name: String) {
        self.publish_event(ListenerEvent::EventDispatched { namespace, name })
            .await;
    }

    /// Publish a request failed event
    pub async fn publish_request_failed(&self, error_type: String, message: String) {
        self.publish_event(ListenerEvent::RequestFailed {
            error_type,
            message,
        })
        .await;
    }

    /// Publish a response sent event
    pub async fn publish_response_sent(&self, status: StatusCode, duration_ms: u64) {
        self.publish_event(ListenerEvent::ResponseSent {
            status,
            duration_ms,
        })
        .await;
    }

    async fn publish_event(&self, event: ListenerEvent) {
        let subscribers = self.lock_subscribers().clone();
        for subscriber in subscribers.iter() {
            subscriber.handle_event(event.clone()).await;
        }
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn EventSubscriber>>> {
        // A panicking subscriber cannot leave the list half-updated.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Writes listener events to the configured destination.
pub struct EventLogger {
    config: EventLoggerConfig,
    file: Option<Mutex<File>>,
}

impl EventLogger {
    /// Create a new event logger with the given configuration
    pub fn new(config: EventLoggerConfig) -> Self {
        let file = match &config.destination {
            LogDestination::File { path, .. } => match Self::open_log_file(path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(err) => {
                    error!("Failed to open log file {}: {}", path, err);
                    None
                }
            },
            _ => None,
        };

        Self { config, file }
    }

    fn open_log_file(path: &str) -> io::Result<File> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }

        OpenOptions::new().create(true).append(true).open(path)
    }

    fn log_event(&self, event: &ListenerEvent) -> crate::error::Result<()> {
        let log_message = if self.config.structured {
            self.format_structured_log(event)?
        } else {
            self.format_plain_log(event)
        };

        match &self.config.destination {
            LogDestination::Console => {
                match self.config.log_level {
                    Level::ERROR => error!("{}", log_message),
                    Level::WARN => warn!("{}", log_message),
                    Level::INFO => info!("{}", log_message),
                    Level::DEBUG => debug!("{}", log_message),
                    _ => trace!("{}", log_message),
                }
                Ok(())
            }
            LogDestination::File { path, max_size } => {
                let Some(file) = &self.file else {
                    // Fall back to console logging if the file isn't available
                    error!("{}", log_message);
                    return Ok(());
                };

                let mut file_guard = file.lock().map_err(|_| {
                    crate::error::Error::Config("Failed to acquire log file lock".to_string())
                })?;

                if let Some(max_size) = max_size {
                    if file_guard.metadata()?.len() >= *max_size {
                        fs::rename(path, format!("{}.1", path))?;
                        *file_guard = Self::open_log_file(path)?;
                    }
                }

                writeln!(file_guard, "{}", log_message)?;
                file_guard.flush()?;
                Ok(())
            }
            LogDestination::Custom(func) => {
                func(&log_message);
                Ok(())
            }
        }
    }

    fn format_plain_log(&self, event: &ListenerEvent) -> String {
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");

        match event {
            ListenerEvent::ServerStarted { address } => {
                format!("[{}] SERVER STARTED: address={}", now, address)
            }
            ListenerEvent::ServerStopped => format!("[{}] SERVER STOPPED", now),
            ListenerEvent::RequestReceived {
                method,
                path,
                timestamp,
            } => format!(
                "[{}] REQUEST RECEIVED: method={}, path={}, timestamp={}",
                now,
                method,
                path,
                timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ")
            ),
            ListenerEvent::EventDispatched { namespace, name } => format!(
                "[{}] EVENT DISPATCHED: namespace={}, name={}",
                now, namespace, name
            ),
            ListenerEvent::RequestFailed {
                error_type,
                message,
            } => format!(
                "[{}] REQUEST FAILED: type={}, message={}",
                now, error_type, message
            ),
            ListenerEvent::ResponseSent {
                status,
                duration_ms,
            } => format!(
                "[{}] RESPONSE SENT: status={}, duration_ms={}",
                now,
                status.as_u16(),
                duration_ms
            ),
        }
    }

    fn format_structured_log(&self, event: &ListenerEvent) -> crate::error::Result<String> {
        let event_data = match event {
            ListenerEvent::ServerStarted { address } => json!({ "address": address }),
            ListenerEvent::ServerStopped => json!({}),
            ListenerEvent::RequestReceived {
                method,
                path,
                timestamp,
            } => json!({
                "method": method,
                "path": path,
                "request_timestamp": timestamp.to_rfc3339(),
            }),
            ListenerEvent::EventDispatched { namespace, name } => json!({
                "namespace": namespace,
                "name": name,
            }),
            ListenerEvent::RequestFailed {
                error_type,
                message,
            } => json!({
                "error_type": error_type,
                "message": message,
            }),
            ListenerEvent::ResponseSent {
                status,
                duration_ms,
            } => json!({
                "status": status.as_u16(),
                "duration_ms": duration_ms,
            }),
        };

        let log_entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event_type": event.event_type(),
            "data": event_data,
        });

        Ok(serde_json::to_string(&log_entry)?)
    }
}

#[async_trait]
impl EventSubscriber for EventLogger {
    async fn handle_event(&self, event: ListenerEvent) {
        if let Err(err) = self.log_event(&event) {
            error!("Failed to log event: {}", err);
        }
    }
}

impl fmt::Debug for EventLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLogger")
            .field("config", &self.config)
            .field("file", &self.file.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    struct TestSubscriber {
        events: Arc<Mutex<Vec<ListenerEvent>>>,
    }

    #[async_trait]
    impl EventSubscriber for TestSubscriber {
        async fn handle_event(&self, event: ListenerEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish() {
        let event_bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        event_bus.subscribe(TestSubscriber {
            events: events.clone(),
        });

        event_bus
            .publish_server_started("127.0.0.1:8082".to_string())
            .await;
        event_bus
            .publish_event_dispatched("ns1".to_string(), "res1".to_string())
            .await;

        let received_events = events.lock().unwrap();
        assert_eq!(received_events.len(), 2);

        match &received_events[0] {
            ListenerEvent::ServerStarted { address } => assert_eq!(address, "127.0.0.1:8082"),
            _ => panic!("Expected ServerStarted event"),
        }

        match &received_events[1] {
            ListenerEvent::EventDispatched { namespace, name } => {
                assert_eq!(namespace, "ns1");
                assert_eq!(name, "res1");
            }
            _ => panic!("Expected EventDispatched event"),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let event_bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let handle = event_bus.subscribe(TestSubscriber {
            events: events.clone(),
        });
        assert_eq!(event_bus.subscriber_count(), 1);

        event_bus.unsubscribe(&handle);
        assert_eq!(event_bus.subscriber_count(), 0);

        event_bus.publish_server_stopped().await;
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_destination_plain_format() {
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        let logger = EventLogger::new(EventLoggerConfig {
            destination: LogDestination::Custom(Arc::new(move |line: &str| {
                sink.lock().unwrap().push(line.to_string());
            })),
            structured: false,
            log_level: Level::INFO,
        });

        logger
            .handle_event(ListenerEvent::RequestFailed {
                error_type: "routing_error".to_string(),
                message: "contract version cannot be empty".to_string(),
            })
            .await;

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(
            "REQUEST FAILED: type=routing_error, message=contract version cannot be empty"
        ));
    }

    #[tokio::test]
    async fn test_structured_file_logging() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("nested").join("events.log");
        let logger = EventLogger::new(EventLoggerConfig {
            destination: LogDestination::File {
                path: log_path.to_string_lossy().to_string(),
                max_size: None,
            },
            structured: true,
            log_level: Level::INFO,
        });

        logger
            .handle_event(ListenerEvent::ResponseSent {
                status: StatusCode::OK,
                duration_ms: 3,
            })
            .await;

        let content = fs::read_to_string(&log_path).unwrap();
        let entry: Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(entry["event_type"], "response_sent");
        assert_eq!(entry["data"]["status"], 200);
        assert!(entry["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_file_rotation() {
        let temp_dir = tempdir().unwrap();
        let log_path = temp_dir.path().join("events.log");
        let path = log_path.to_string_lossy().to_string();
        let logger = EventLogger::new(EventLoggerConfig {
            destination: LogDestination::File {
                path: path.clone(),
                max_size: Some(1),
            },
            structured: false,
            log_level: Level::INFO,
        });

        logger.handle_event(ListenerEvent::ServerStopped).await;
        logger.handle_event(ListenerEvent::ServerStopped).await;

        let rotated = fs::read_to_string(format!("{}.1", path)).unwrap();
        let current = fs::read_to_string(&path).unwrap();
        assert_eq!(rotated.lines().count(), 1);
        assert_eq!(current.lines().count(), 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = EventLoggerConfig {
            destination: LogDestination::File {
                path: "/var/log/skr.log".to_string(),
                max_size: Some(42),
            },
            structured: false,
            log_level: Level::DEBUG,
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["destination_type"], "file");
        assert_eq!(value["destination_path"], "/var/log/skr.log");
        assert_eq!(value["log_level"], "DEBUG");

        let parsed: EventLoggerConfig = serde_json::from_value(value).unwrap();
        assert!(matches!(
            parsed.destination,
            LogDestination::File { ref path, max_size: Some(42) } if path == "/var/log/skr.log"
        ));
        assert_eq!(parsed.log_level, Level::DEBUG);
        assert!(!parsed.structured);
    }

    #[test]
    fn test_config_rejects_custom_destination() {
        let result = serde_json::from_str::<EventLoggerConfig>(r#"{"destination_type":"custom"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_destination_is_not_serializable() {
        let config = EventLoggerConfig {
            destination: LogDestination::Custom(Arc::new(|_: &str| {})),
            structured: false,
            log_level: Level::INFO,
        };

        let err = serde_json::to_string(&config).unwrap_err();
        assert!(err.to_string().contains("custom log destinations"));

        let listener_config = crate::config::ListenerConfig {
            event_logger: Some(config),
            ..crate::config::ListenerConfig::default()
        };
        assert!(serde_json::to_value(&listener_config).is_err());
    }
}
