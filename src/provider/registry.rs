//! Provider registry — configured backends plus a short-lived probe cache.
//!
//! UI surfaces re-query availability and model lists constantly while a
//! picker is open; the cache (default 30 s) keeps that from hammering the
//! backends, while a fresh session after expiry always re-probes. The cache
//! is explicit state with a lifecycle: starts empty, filled on demand,
//! dropped by `invalidate`, rebuilt by `refresh`. A batch run pins its
//! provider and model up front and never consults the registry mid-run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::types::{Availability, ProviderError, ProviderKind, VisionProvider};

/// Default cache time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// What the registry knows about one backend right now.
#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub availability: Availability,
    pub models: Vec<String>,
}

struct CacheEntry {
    availability: Availability,
    models: Vec<String>,
    fetched_at: Instant,
}

/// Errors from registry queries.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider {0} is not configured")]
    NotConfigured(ProviderKind),
    #[error("Provider {0} is unavailable")]
    Unavailable(ProviderKind),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn VisionProvider>>,
    cache: HashMap<ProviderKind, CacheEntry>,
    ttl: Duration,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            cache: HashMap::new(),
            ttl,
        }
    }

    /// Register a configured backend. Replaces any previous client for the
    /// same kind and drops its cached probe.
    pub fn register(&mut self, provider: Arc<dyn VisionProvider>) {
        let kind = provider.kind();
        self.providers.insert(kind, provider);
        self.cache.remove(&kind);
    }

    /// The configured client for a kind, for callers that pin a provider
    /// for a whole run.
    pub fn provider(&self, kind: ProviderKind) -> Result<Arc<dyn VisionProvider>, RegistryError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotConfigured(kind))
    }

    /// Kinds with a registered client, in declaration order.
    pub fn configured(&self) -> Vec<ProviderKind> {
        ProviderKind::all()
            .iter()
            .copied()
            .filter(|k| self.providers.contains_key(k))
            .collect()
    }

    /// Is this provider currently usable? Served from cache within the TTL.
    pub fn availability(&mut self, kind: ProviderKind) -> Result<Availability, RegistryError> {
        Ok(self.entry(kind)?.availability)
    }

    /// Model ids the provider offers. Served from cache within the TTL;
    /// querying an unavailable provider is an error, not an empty list.
    pub fn models(&mut self, kind: ProviderKind) -> Result<Vec<String>, RegistryError> {
        let entry = self.entry(kind)?;
        match entry.availability {
            Availability::Available => Ok(entry.models.clone()),
            _ => Err(RegistryError::Unavailable(kind)),
        }
    }

    /// Snapshot of every configured provider, probing where the cache is
    /// cold. Feeds the CLI `providers` table.
    pub fn descriptors(&mut self) -> Vec<ProviderDescriptor> {
        let kinds = self.configured();
        kinds
            .into_iter()
            .map(|kind| match self.entry(kind) {
                Ok(entry) => ProviderDescriptor {
                    kind,
                    availability: entry.availability,
                    models: entry.models.clone(),
                },
                Err(_) => ProviderDescriptor {
                    kind,
                    availability: Availability::Unknown,
                    models: Vec::new(),
                },
            })
            .collect()
    }

    /// Drop the cached probe for one provider.
    pub fn invalidate(&mut self, kind: ProviderKind) {
        self.cache.remove(&kind);
    }

    /// Drop the cache and re-probe immediately.
    pub fn refresh(&mut self, kind: ProviderKind) -> Result<Availability, RegistryError> {
        self.invalidate(kind);
        self.availability(kind)
    }

    fn entry(&mut self, kind: ProviderKind) -> Result<&CacheEntry, RegistryError> {
        if !self.providers.contains_key(&kind) {
            return Err(RegistryError::NotConfigured(kind));
        }

        let stale = match self.cache.get(&kind) {
            Some(entry) => entry.fetched_at.elapsed() >= self.ttl,
            None => true,
        };

        if stale {
            let provider = &self.providers[&kind];
            // One probe, one listing; a failed listing marks the provider
            // Unavailable until the next refresh. No retry layer here —
            // the client already applied its own policy.
            let (availability, models) = match provider.list_models() {
                Ok(models) => (Availability::Available, models),
                Err(e) => {
                    tracing::debug!(provider = %kind, error = %e, "Probe failed");
                    (Availability::Unavailable, Vec::new())
                }
            };
            self.cache.insert(
                kind,
                CacheEntry {
                    availability,
                    models,
                    fetched_at: Instant::now(),
                },
            );
        }

        Ok(&self.cache[&kind])
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
