//! Configuration for the SKR events listener.

use crate::error::{Error, Result};
use crate::event::EventLoggerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the SKR events listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// The host address to bind to.
    pub host: String,

    /// The port to bind to. `0` picks a free port.
    pub port: u16,

    /// Literal component segment of the event route, e.g. `skr` for
    /// `/v1/skr/event`. `None` accepts any component in that position.
    pub component: Option<String>,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,

    /// How long a request may wait for the consumer to take its event.
    /// `None` waits until the consumer receives it or the listener shuts down.
    pub dispatch_timeout_secs: Option<u64>,

    /// How long graceful shutdown may take before it is reported as failed.
    pub shutdown_grace_secs: u64,

    /// Optional event logger configuration.
    /// If not provided, no event logging will be performed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_logger: Option<EventLoggerConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8082,
            component: Some("skr".to_string()),
            max_body_bytes: 1024 * 1024,
            dispatch_timeout_secs: None,
            shutdown_grace_secs: 10,
            event_logger: None,
        }
    }
}

impl ListenerConfig {
    /// Returns the full server address as a string (e.g., "127.0.0.1:8082").
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the URL a watcher posts to for the given contract version.
    ///
    /// Without a configured component the placeholder `{component}` is used.
    pub fn event_url(&self, version: &str) -> String {
        let component = self.component.as_deref().unwrap_or("{component}");
        format!(
            "http://{}:{}/v{}/{}/event",
            self.host, self.port, version, component
        )
    }

    /// Returns the dispatch timeout as a Duration, if one is configured.
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_secs.map(Duration::from_secs)
    }

    /// Returns the graceful shutdown budget as a Duration.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Checks values that would otherwise only fail when routes are built.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host cannot be empty".to_string()));
        }

        if let Some(component) = &self.component {
            if component.is_empty() {
                return Err(Error::Config("component cannot be empty".to_string()));
            }
            if component.contains('/') {
                return Err(Error::Config(format!(
                    "component '{}' must be a single path segment",
                    component
                )));
            }
        }

        if self.max_body_bytes == 0 {
            return Err(Error::Config(
                "max_body_bytes must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
