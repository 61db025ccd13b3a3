use std::fmt;

use serde::{Deserialize, Serialize};

/// Named conversational context with its own route and history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(String);

impl TopicId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for TopicId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TopicId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Backend route serving one topic. Every topic speaks the same protocol, only
/// the path differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRoute {
    pub topic: TopicId,
    pub path: String,
    #[serde(default)]
    pub label: String,
}

impl TopicRoute {
    pub fn new(topic: impl Into<TopicId>, path: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            label: topic.to_string(),
            topic,
            path: normalize_path(path.into()),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

pub fn default_topic_routes() -> Vec<TopicRoute> {
    vec![
        TopicRoute::new("theme_1", "/ask"),
        TopicRoute::new("theme_2", "/chat"),
        TopicRoute::new("theme_3", "/chat2"),
    ]
}

fn normalize_path(path: String) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
