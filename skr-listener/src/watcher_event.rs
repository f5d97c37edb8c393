//! Wire-level watcher events and the change notifications derived from them.
//!
//! A watcher running inside an SKR cluster posts a [`WatcherEvent`] whenever a
//! watched resource changes. The listener only cares about which resource
//! changed, so each event is reduced to a [`ChangeNotification`] before it is
//! handed to the reconciliation runtime.

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

const SKR_CLUSTER_ID_KEY: &str = "skrClusterID";
const COMPONENT_KEY: &str = "body";
const NAMESPACE_KEY: &str = "namespace";
const NAME_KEY: &str = "name";

/// Event body posted by an SKR watcher.
///
/// Decoding is lenient:
///
/// - keys match case-insensitively (`Name` sets `name`)
/// - when a key repeats, the last value wins
/// - a missing field stays empty and `null` leaves a field unchanged
/// - unknown keys are ignored
///
/// Presence is not validated: empty namespaces and names are passed through
/// as-is. A field holding anything other than a string or `null` is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatcherEvent {
    /// Identifier of the SKR cluster the event originates from.
    #[serde(rename = "skrClusterID")]
    pub skr_cluster_id: String,

    /// Name of the component that produced the event.
    #[serde(rename = "body")]
    pub component: String,

    /// Namespace of the changed resource.
    pub namespace: String,

    /// Name of the changed resource.
    pub name: String,
}

impl WatcherEvent {
    fn field_mut(&mut self, key: &str) -> Option<&mut String> {
        if key.eq_ignore_ascii_case(SKR_CLUSTER_ID_KEY) {
            Some(&mut self.skr_cluster_id)
        } else if key.eq_ignore_ascii_case(COMPONENT_KEY) {
            Some(&mut self.component)
        } else if key.eq_ignore_ascii_case(NAMESPACE_KEY) {
            Some(&mut self.namespace)
        } else if key.eq_ignore_ascii_case(NAME_KEY) {
            Some(&mut self.name)
        } else {
            None
        }
    }
}

impl<'de> Deserialize<'de> for WatcherEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(WatcherEventVisitor)
    }
}

struct WatcherEventVisitor;

impl<'de> Visitor<'de> for WatcherEventVisitor {
    type Value = WatcherEvent;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a watcher event object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut event = WatcherEvent::default();

        while let Some(key) = map.next_key::<String>()? {
            match event.field_mut(&key) {
                Some(field) => {
                    // null leaves the current value untouched
                    if let Some(value) = map.next_value::<Option<String>>()? {
                        *field = value;
                    }
                }
                None => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(event)
    }
}

/// Minimal reference to a resource that needs reconciling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Name of the changed resource.
    pub name: String,

    /// Namespace of the changed resource.
    pub namespace: String,
}

impl ChangeNotification {
    /// Creates a notification for the given resource.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl From<WatcherEvent> for ChangeNotification {
    fn from(event: WatcherEvent) -> Self {
        Self {
            name: event.name,
            namespace: event.namespace,
        }
    }
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
