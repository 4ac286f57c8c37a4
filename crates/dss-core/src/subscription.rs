//! Subscriptions bind an event name and a set of property filters to a handler

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::event::Event;

/// Errors raised when building a subscription
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription id must not be empty")]
    EmptyId,

    #[error("subscription event name must not be empty")]
    EmptyEventName,

    #[error("subscription handler name must not be empty")]
    EmptyHandlerName,

    #[error("subscription id '{0}' is already registered")]
    DuplicateId(String),
}

/// Result type for subscription operations
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// How the property filters of a subscription are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    /// Filters are ignored, every event with the right name matches
    #[serde(rename = "none")]
    MatchNone,
    /// Every filter must pass
    #[default]
    #[serde(rename = "all")]
    MatchAll,
    /// At least one filter must pass
    #[serde(rename = "one")]
    MatchOne,
}

impl FilterMode {
    /// Parse a configured match type. Unknown values fall back to
    /// [`FilterMode::MatchAll`].
    pub fn from_config(value: &str) -> Self {
        match value {
            "all" => FilterMode::MatchAll,
            "none" => FilterMode::MatchNone,
            "one" => FilterMode::MatchOne,
            other => {
                error!(match_type = other, "Unknown filter match type, reverting to 'all'");
                FilterMode::MatchAll
            }
        }
    }
}

/// A single property predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyFilter {
    /// The property is set and equals `value`
    Matches { property: String, value: String },
    /// The property is set
    Exists { property: String },
    /// The property is not set
    Missing { property: String },
}

impl PropertyFilter {
    pub fn matches(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Matches {
            property: property.into(),
            value: value.into(),
        }
    }

    pub fn exists(property: impl Into<String>) -> Self {
        Self::Exists {
            property: property.into(),
        }
    }

    pub fn missing(property: impl Into<String>) -> Self {
        Self::Missing {
            property: property.into(),
        }
    }

    /// Evaluate the predicate against an event
    pub fn check(&self, event: &Event) -> bool {
        match self {
            PropertyFilter::Matches { property, value } => {
                event.property(property) == Some(value.as_str())
            }
            PropertyFilter::Exists { property } => event.has_property(property),
            PropertyFilter::Missing { property } => !event.has_property(property),
        }
    }
}

/// Free-form string parameters handed to the handler with each event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionOptions(HashMap<String, String>);

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl FromIterator<(String, String)> for SubscriptionOptions {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Binds an event name to a named handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: String,
    event_name: String,
    handler_name: String,
    mode: FilterMode,
    filters: Vec<PropertyFilter>,
    options: SubscriptionOptions,
}

impl Subscription {
    /// Create a subscription without filters
    ///
    /// New subscriptions start in [`FilterMode::MatchAll`], so an empty
    /// filter list matches every event of the given name.
    pub fn new(
        id: impl Into<String>,
        event_name: impl Into<String>,
        handler_name: impl Into<String>,
    ) -> SubscriptionResult<Self> {
        let id = id.into();
        let event_name = event_name.into();
        let handler_name = handler_name.into();
        if id.is_empty() {
            return Err(SubscriptionError::EmptyId);
        }
        if event_name.is_empty() {
            return Err(SubscriptionError::EmptyEventName);
        }
        if handler_name.is_empty() {
            return Err(SubscriptionError::EmptyHandlerName);
        }
        Ok(Self {
            id,
            event_name,
            handler_name,
            mode: FilterMode::default(),
            filters: Vec::new(),
            options: SubscriptionOptions::new(),
        })
    }

    pub fn with_mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_filter(mut self, filter: PropertyFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.set(name, value);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn filters(&self) -> &[PropertyFilter] {
        &self.filters
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    /// Whether the event should be delivered to this subscription's handler
    pub fn matches(&self, event: &Event) -> bool {
        if event.name() != self.event_name {
            return false;
        }
        if self.filters.is_empty() {
            return true;
        }
        match self.mode {
            FilterMode::MatchNone => true,
            FilterMode::MatchAll => self.filters.iter().all(|f| f.check(event)),
            FilterMode::MatchOne => self.filters.iter().any(|f| f.check(event)),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.id, self.event_name, self.handler_name)
    }
}

/// Subscription as declared in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SubscriptionConfig {
    /// Proposed id, defaults to `{event-name}_{handler-name}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub event_name: String,
    #[serde(default)]
    pub handler_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
    /// Handler parameters; scalar values are stored as strings
    #[serde(default, alias = "parameters")]
    pub parameter: HashMap<String, serde_json::Value>,
}

impl SubscriptionConfig {
    /// The id proposal used when none is configured
    pub fn proposed_id(&self) -> String {
        self.id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}_{}", self.event_name, self.handler_name))
    }

    /// Build a subscription with the given (already deduplicated) id
    pub fn build(&self, id: impl Into<String>) -> SubscriptionResult<Subscription> {
        let options: SubscriptionOptions = self
            .parameter
            .iter()
            .map(|(k, v)| (k.clone(), json_to_string(v)))
            .collect();

        let mut subscription =
            Subscription::new(id, &self.event_name, &self.handler_name)?.with_options(options);

        if let Some(filter) = &self.filter {
            subscription.mode = FilterMode::from_config(&filter.match_type);
            subscription.filters = filter
                .properties
                .iter()
                .filter_map(FilterPropertyConfig::to_filter)
                .collect();
        }
        Ok(subscription)
    }
}

/// Filter block of a configured subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(rename = "match", default = "default_match_type")]
    pub match_type: String,
    #[serde(default)]
    pub properties: Vec<FilterPropertyConfig>,
}

fn default_match_type() -> String {
    "all".to_string()
}

/// One configured property filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPropertyConfig {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub property: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl FilterPropertyConfig {
    fn to_filter(&self) -> Option<PropertyFilter> {
        if self.kind.is_empty() || self.property.is_empty() {
            warn!(
                filter_type = %self.kind,
                property = %self.property,
                "Skipping incomplete property filter"
            );
            return None;
        }
        match self.kind.as_str() {
            "exists" => Some(PropertyFilter::exists(&self.property)),
            "missing" => Some(PropertyFilter::missing(&self.property)),
            "matches" => Some(PropertyFilter::matches(
                &self.property,
                self.value.as_ref().map(json_to_string).unwrap_or_default(),
            )),
            other => {
                error!(filter_type = other, "Unknown property filter type");
                None
            }
        }
    }
}

/// Render a JSON scalar the way it would appear as an event property
pub fn json_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
