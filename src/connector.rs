//! Connector trait and catalog types
//!
//! Every source implements `Connector`. The streams a connector exposes do
//! the fetching; `discover` and `read` are derived from them.

use crate::engine::{Message, SourceStream, SyncConfig, SyncEngine};
use crate::error::{Error, Result};
use crate::state::{State, StateManager};
use crate::types::{DestinationSyncMode, PropertyType, SyncMode};
use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

// ============================================================================
// Connector Spec (for UI)
// ============================================================================

/// Connector specification returned by spec()
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Connector name
    pub name: String,

    /// Human-readable title
    pub title: String,

    /// Description
    pub description: Option<String>,

    /// Configuration specification
    pub spec: SpecConfig,
}

impl ConnectorSpec {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: None,
            spec: SpecConfig::default(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn property(mut self, name: impl Into<String>, property: PropertyConfig) -> Self {
        self.spec.properties.insert(name.into(), property);
        self
    }

    /// JSON Schema form of the connection specification
    pub fn connection_specification(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, prop) in &self.spec.properties {
            if prop.required {
                required.push(Value::String(name.clone()));
            }
            properties.insert(name.clone(), prop.to_json_schema());
        }
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": self.title,
            "type": "object",
            "required": required,
            "properties": properties,
        })
    }
}

/// Configuration specification for connector setup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecConfig {
    /// Configuration properties, sorted by name
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyConfig>,
}

/// Configuration property definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyConfig {
    /// Property type
    #[serde(rename = "type", default)]
    pub property_type: PropertyType,

    /// Property description
    #[serde(default)]
    pub description: Option<String>,

    /// Whether this is a secret (should be masked)
    #[serde(default)]
    pub secret: bool,

    /// Whether this property is required
    #[serde(default)]
    pub required: bool,

    /// Default value
    #[serde(default)]
    pub default: Option<Value>,

    /// For arrays: item type
    #[serde(default)]
    pub items: Option<Box<PropertyConfig>>,
}

impl PropertyConfig {
    fn of(property_type: PropertyType, description: &str) -> Self {
        Self {
            property_type,
            description: Some(description.to_string()),
            ..Self::default()
        }
    }

    pub fn string(description: &str) -> Self {
        Self::of(PropertyType::String, description)
    }

    pub fn integer(description: &str) -> Self {
        Self::of(PropertyType::Integer, description)
    }

    pub fn boolean(description: &str) -> Self {
        Self::of(PropertyType::Boolean, description)
    }

    pub fn object(description: &str) -> Self {
        Self::of(PropertyType::Object, description)
    }

    /// Array with items of the given type
    pub fn array(description: &str, items: PropertyConfig) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(PropertyType::Array, description)
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert(
            "type".to_string(),
            serde_json::to_value(&self.property_type).unwrap_or(Value::Null),
        );
        if let Some(description) = &self.description {
            schema.insert("description".to_string(), json!(description));
        }
        if self.secret {
            schema.insert("airbyte_secret".to_string(), json!(true));
        }
        if let Some(default) = &self.default {
            schema.insert("default".to_string(), default.clone());
        }
        if let Some(items) = &self.items {
            schema.insert("items".to_string(), items.to_json_schema());
        }
        Value::Object(schema)
    }
}

// ============================================================================
// Check Result
// ============================================================================

/// Result of a connection check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Whether the check succeeded
    pub success: bool,

    /// Error message if failed
    pub message: Option<String>,
}

impl CheckResult {
    /// Create a successful check result
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// Create a failed check result
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }

    /// Success when the probe returned Ok, failure carrying the error otherwise
    pub fn from_probe<T>(probe: Result<T>) -> Self {
        match probe {
            Ok(_) => Self::success(),
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

// ============================================================================
// Catalog Types
// ============================================================================

/// Discovered catalog (available streams)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Available streams
    pub streams: Vec<CatalogStream>,
}

impl Catalog {
    /// Find a stream by name
    pub fn stream(&self, name: &str) -> Option<&CatalogStream> {
        self.streams.iter().find(|s| s.name == name)
    }
}

/// Stream in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStream {
    /// Stream name
    pub name: String,

    /// JSON schema for the stream
    #[serde(default)]
    pub json_schema: Value,

    /// Supported sync modes
    #[serde(default)]
    pub supported_sync_modes: Vec<SyncMode>,

    /// Default cursor field
    #[serde(default)]
    pub default_cursor_field: Option<Vec<String>>,

    /// Source-defined primary key
    #[serde(default)]
    pub source_defined_primary_key: Option<Vec<Vec<String>>>,
}

/// Configured catalog (selected streams for sync)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfiguredCatalog {
    /// Selected streams
    pub streams: Vec<ConfiguredStream>,
}

impl ConfiguredCatalog {
    /// Select streams from a discovered catalog.
    ///
    /// Streams supporting incremental sync are configured incremental. With a
    /// filter only the named streams are kept, in catalog order.
    pub fn from_catalog(catalog: &Catalog, filter: Option<&[&str]>) -> Self {
        let streams = catalog
            .streams
            .iter()
            .filter(|s| filter.map_or(true, |names| names.contains(&s.name.as_str())))
            .map(|s| ConfiguredStream {
                sync_mode: if s.supported_sync_modes.contains(&SyncMode::Incremental) {
                    SyncMode::Incremental
                } else {
                    SyncMode::FullRefresh
                },
                destination_sync_mode: DestinationSyncMode::Append,
                cursor_field: s.default_cursor_field.clone(),
                primary_key: s.source_defined_primary_key.clone(),
                stream: s.clone(),
            })
            .collect();
        Self { streams }
    }
}

/// Configured stream for sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredStream {
    /// Stream reference
    pub stream: CatalogStream,

    /// Selected sync mode
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Destination sync mode
    #[serde(default)]
    pub destination_sync_mode: DestinationSyncMode,

    /// Cursor field to use
    #[serde(default)]
    pub cursor_field: Option<Vec<String>>,

    /// Primary key to use
    #[serde(default)]
    pub primary_key: Option<Vec<Vec<String>>>,
}

// ============================================================================
// Connector Trait
// ============================================================================

/// Type alias for the message stream returned by read()
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Shared handle to a stream
pub type StreamRef = Arc<dyn SourceStream>;

/// Core trait that all connectors implement
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector specification (for UI/validation)
    fn spec(&self) -> ConnectorSpec;

    /// Tests if credentials and configuration are valid
    async fn check(&self, config: &Value) -> Result<CheckResult>;

    /// Build the streams enabled by this config
    fn streams(&self, config: &Value) -> Result<Vec<StreamRef>>;

    /// Lists available streams from the source
    async fn discover(&self, config: &Value) -> Result<Catalog> {
        let streams = self.streams(config)?;
        Ok(Catalog {
            streams: streams.iter().map(|s| s.catalog_entry()).collect(),
        })
    }

    /// Reads data from selected streams
    ///
    /// Returns a stream of messages (records, state checkpoints, logs).
    /// A failing stream is reported as an error log and the others still run.
    async fn read(
        &self,
        config: &Value,
        catalog: &ConfiguredCatalog,
        state: Option<&State>,
    ) -> Result<MessageStream> {
        let streams = self.streams(config)?;
        let selected = select_streams(&streams, catalog)?;

        let manager = StateManager::from_state(state.cloned().unwrap_or_default());
        let mut engine =
            SyncEngine::new(manager).with_config(SyncConfig::new().with_fail_fast(false));
        let plan: Vec<(&dyn SourceStream, SyncMode)> =
            selected.iter().map(|(s, m)| (s.as_ref(), *m)).collect();
        let messages = engine.sync_streams(&plan).await?;

        Ok(Box::pin(futures::stream::iter(
            messages.into_iter().map(Ok),
        )))
    }
}

/// Match configured streams to built streams, keeping catalog order.
///
/// A stream that only supports full refresh is read in full refresh even
/// when configured incremental.
pub fn select_streams(
    streams: &[StreamRef],
    catalog: &ConfiguredCatalog,
) -> Result<Vec<(StreamRef, SyncMode)>> {
    catalog
        .streams
        .iter()
        .map(|configured| {
            let stream = streams
                .iter()
                .find(|s| s.name() == configured.stream.name)
                .ok_or_else(|| Error::StreamNotFound {
                    stream: configured.stream.name.clone(),
                })?;
            let mode = if stream.supported_sync_modes().contains(&configured.sync_mode) {
                configured.sync_mode
            } else {
                SyncMode::FullRefresh
            };
            Ok((Arc::clone(stream), mode))
        })
        .collect()
}

/// Deserialize a connector config, mapping failures to `Error::Config`
pub fn parse_config<T: DeserializeOwned>(connector: &str, config: &Value) -> Result<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| Error::config(format!("Invalid {connector} config: {e}")))
}
