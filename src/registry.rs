//! Model Registry: registered models, capability metadata, and rolling
//! per-backend health, per `spec.md` §4.9.
//!
//! Mirrors the teacher's `DashMap`-backed concurrent state pattern
//! (`llm::router::LLMRouter` kept an `Arc<RwLock<HashMap<...>>>` of health;
//! here the whole registry is `DashMap`-based so reads never block writers
//! on unrelated keys).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::envelope::Capability;
use crate::error::{ErrorKind, RouterError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Canonical `provider:model` id.
    pub id: String,
    pub provider_tag: String,
    pub capabilities: HashSet<Capability>,
    pub context_window: u32,
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
    pub default_max_tokens: u32,
    pub quality_score: Option<f32>,
    pub speed_score: Option<f32>,
}

impl ModelDescriptor {
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.capabilities.is_empty() {
            return Err(RouterError::invalid_request(format!(
                "model {} must declare at least one capability",
                self.id
            )));
        }
        if self.input_price_per_million < 0.0 || self.output_price_per_million < 0.0 {
            return Err(RouterError::invalid_request(format!(
                "model {} has negative pricing",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub ok_count_window: u32,
    pub fail_count_window: u32,
    pub avg_latency_ms: f64,
    pub last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            ok_count_window: 0,
            fail_count_window: 0,
            avg_latency_ms: 0.0,
            last_failure_at: None,
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
        }
    }
}

impl BackendHealth {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.ok_count_window += 1;
        self.consecutive_failures = 0;
        let n = (self.ok_count_window + self.fail_count_window).max(1) as f64;
        self.avg_latency_ms += (latency_ms as f64 - self.avg_latency_ms) / n;
    }

    pub fn record_failure(&mut self) {
        self.fail_count_window += 1;
        self.consecutive_failures += 1;
        self.last_failure_at = Some(chrono::Utc::now());
    }
}

/// Immutable view handed to strategy functions so a routing decision never
/// observes a write that lands mid-evaluation.
#[derive(Clone)]
pub struct RegistrySnapshot {
    pub models: Vec<ModelDescriptor>,
    pub health: Arc<DashMap<String, BackendHealth>>,
}

impl RegistrySnapshot {
    pub fn health_of(&self, id: &str) -> BackendHealth {
        self.health.get(id).map(|h| h.clone()).unwrap_or_default()
    }
}

pub struct ModelRegistry {
    models: DashMap<String, ModelDescriptor>,
    by_provider: DashMap<String, HashSet<String>>,
    health: Arc<DashMap<String, BackendHealth>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: DashMap::new(),
            by_provider: DashMap::new(),
            health: Arc::new(DashMap::new()),
        }
    }

    pub fn register(&self, desc: ModelDescriptor) -> Result<(), RouterError> {
        desc.validate()?;
        if self.models.contains_key(&desc.id) {
            return Err(RouterError::new(
                ErrorKind::InvalidRequest,
                format!("duplicate_model: {}", desc.id),
            ));
        }
        self.by_provider
            .entry(desc.provider_tag.clone())
            .or_default()
            .insert(desc.id.clone());
        self.health.entry(desc.id.clone()).or_default();
        self.models.insert(desc.id.clone(), desc);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Option<ModelDescriptor> {
        let removed = self.models.remove(id).map(|(_, v)| v);
        if let Some(desc) = &removed {
            if let Some(mut set) = self.by_provider.get_mut(&desc.provider_tag) {
                set.remove(id);
            }
            self.health.remove(id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<ModelDescriptor> {
        self.models.get(id).map(|m| m.clone())
    }

    /// Accepts a canonical id, a bare model name (first match wins — callers
    /// needing disambiguation should filter the snapshot themselves), or a
    /// `provider:*` glob resolving to any model of that provider.
    pub fn resolve(&self, hint: &str) -> Option<String> {
        if self.models.contains_key(hint) {
            return Some(hint.to_string());
        }
        if let Some(provider) = hint.strip_suffix(":*") {
            return self
                .by_provider
                .get(provider)
                .and_then(|set| set.iter().next().cloned());
        }
        self.models
            .iter()
            .find(|entry| entry.value().id.ends_with(&format!(":{hint}")))
            .map(|entry| entry.key().clone())
    }

    pub fn update_health(&self, id: &str, success: bool, latency_ms: u64) {
        let mut entry = self.health.entry(id.to_string()).or_default();
        if success {
            entry.record_success(latency_ms);
        } else {
            entry.record_failure();
        }
    }

    pub fn health_of(&self, id: &str) -> BackendHealth {
        self.health.get(id).map(|h| h.clone()).unwrap_or_default()
    }

    pub fn set_circuit_state(&self, id: &str, state: CircuitState) {
        self.health.entry(id.to_string()).or_default().circuit_state = state;
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            models: self.models.iter().map(|e| e.value().clone()).collect(),
            health: self.health.clone(),
        }
    }

    pub fn list(&self) -> Vec<ModelDescriptor> {
        self.models.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;

    fn desc(id: &str, provider: &str) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            provider_tag: provider.to_string(),
            capabilities: Set::from([Capability::Chat]),
            context_window: 8192,
            input_price_per_million: 1.0,
            output_price_per_million: 2.0,
            default_max_tokens: 1024,
            quality_score: Some(0.8),
            speed_score: Some(0.8),
        }
    }

    #[test]
    fn register_then_unregister_restores_empty_state() {
        let reg = ModelRegistry::new();
        reg.register(desc("openai:gpt-4", "openai")).unwrap();
        assert!(reg.get("openai:gpt-4").is_some());
        reg.unregister("openai:gpt-4");
        assert!(reg.get("openai:gpt-4").is_none());
        assert!(reg.list().is_empty());
    }

    #[test]
    fn duplicate_register_is_rejected() {
        let reg = ModelRegistry::new();
        reg.register(desc("openai:gpt-4", "openai")).unwrap();
        let err = reg.register(desc("openai:gpt-4", "openai")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn resolve_bare_name_and_glob() {
        let reg = ModelRegistry::new();
        reg.register(desc("openai:gpt-4", "openai")).unwrap();
        assert_eq!(reg.resolve("gpt-4"), Some("openai:gpt-4".to_string()));
        assert_eq!(reg.resolve("openai:*"), Some("openai:gpt-4".to_string()));
        assert_eq!(reg.resolve("openai:gpt-4"), Some("openai:gpt-4".to_string()));
    }

    #[test]
    fn health_tracks_consecutive_failures() {
        let reg = ModelRegistry::new();
        reg.register(desc("openai:gpt-4", "openai")).unwrap();
        reg.update_health("openai:gpt-4", false, 0);
        reg.update_health("openai:gpt-4", false, 0);
        let health = reg.health_of("openai:gpt-4");
        assert_eq!(health.consecutive_failures, 2);
        reg.update_health("openai:gpt-4", true, 120);
        assert_eq!(reg.health_of("openai:gpt-4").consecutive_failures, 0);
    }
}
