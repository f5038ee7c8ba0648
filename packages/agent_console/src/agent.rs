use crate::config::AgentFileConfig;
use agent_stream::OutboundComposer;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The agent id stamped on every outbound frame, shared by the chat and
/// terminal consumers so a switch applies to both.
#[derive(Debug, Clone)]
pub struct ActiveAgent(Arc<RwLock<String>>);

impl ActiveAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(id.into())))
    }

    pub fn get(&self) -> String {
        self.0.read().clone()
    }

    pub fn set(&self, id: impl Into<String>) {
        *self.0.write() = id.into();
    }

    pub fn composer(&self) -> OutboundComposer {
        OutboundComposer::new(self.get())
    }
}

/// Display labels for known agents.
#[derive(Debug, Clone, Default)]
pub struct AgentCatalog {
    labels: BTreeMap<String, String>,
}

impl AgentCatalog {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    pub fn from_file(fc: &AgentFileConfig) -> Self {
        Self::new(fc.agents.clone())
    }

    /// Label for `id`, or the id itself when unknown.
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.labels.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    pub fn greeting(&self, id: &str) -> String {
        format!("I am {} agent. How can I help you today?", self.label(id))
    }

    pub fn switched_message(&self, id: &str) -> String {
        format!("Switched to {} agent. How can I help you?", self.label(id))
    }
}
