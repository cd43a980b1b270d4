//! Ranked, tiered model catalog
//!
//! The catalog owns an immutable [`CatalogSnapshot`] behind an `ArcSwap`.
//! Routing only ever loads the current snapshot; a refresh builds a complete
//! replacement off to the side and swaps it in atomically. Refresh failures
//! keep the previous snapshot.

use super::{
    DiscoveredModel, DiscoveryError, ModelDescriptor, ModelDiscovery, ModelId, RateLimitTracker,
    Tier,
};
use crate::config::CatalogConfig;
use crate::metrics::{Metrics, RefreshOutcome};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// One committed generation of the catalog
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    generation: u64,
    refreshed_at: Option<DateTime<Utc>>,
    tiers: BTreeMap<Tier, Vec<ModelDescriptor>>,
}

impl CatalogSnapshot {
    /// Incremented on every successful refresh; 0 = configured models only
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Models of a tier ordered by rank, cooldowns ignored
    pub fn models(&self, tier: Tier) -> &[ModelDescriptor] {
        self.tiers.get(&tier).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of models per tier
    pub fn counts(&self) -> BTreeMap<Tier, usize> {
        Tier::ALL
            .iter()
            .map(|tier| (*tier, self.models(*tier).len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tiers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Summary of a committed refresh
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RefreshReport {
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub models: BTreeMap<Tier, usize>,
}

impl From<&CatalogSnapshot> for RefreshReport {
    fn from(snapshot: &CatalogSnapshot) -> Self {
        Self {
            generation: snapshot.generation,
            refreshed_at: snapshot.refreshed_at,
            models: snapshot.counts(),
        }
    }
}

/// Catalog of tiered models, refreshed from a discovery source
pub struct ModelCatalog {
    snapshot: ArcSwap<CatalogSnapshot>,
    pinned: Vec<ModelDescriptor>,
    discovery: Arc<dyn ModelDiscovery>,
    tracker: Arc<RateLimitTracker>,
    metrics: Arc<Metrics>,
    top_n: usize,
    backups: usize,
    cheap_max_cost_per_token: f64,
    refresh_lock: Mutex<()>,
}

impl ModelCatalog {
    /// Create a catalog seeded with the configured (pinned) models
    ///
    /// Pinned models are never dropped by a refresh and rank ahead of
    /// discovered models in their tier.
    pub fn new(
        config: &CatalogConfig,
        pinned: Vec<ModelDescriptor>,
        discovery: Arc<dyn ModelDiscovery>,
        tracker: Arc<RateLimitTracker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let mut pinned = pinned;
        pinned.sort_by(|a, b| {
            a.tier()
                .cmp(&b.tier())
                .then(a.rank().cmp(&b.rank()))
                .then_with(|| a.id().cmp(b.id()))
        });

        let catalog = Self {
            snapshot: ArcSwap::from_pointee(CatalogSnapshot {
                generation: 0,
                refreshed_at: None,
                tiers: BTreeMap::new(),
            }),
            pinned,
            discovery,
            tracker,
            metrics,
            top_n: config.top_n(),
            backups: config.backups(),
            cheap_max_cost_per_token: config.cheap_max_cost_per_token(),
            refresh_lock: Mutex::new(()),
        };
        let seeded = catalog.build_snapshot(Vec::new(), 0, None);
        tracing::info!(
            pinned_models = seeded.len(),
            "ModelCatalog initialized with configured models"
        );
        catalog.snapshot.store(Arc::new(seeded));
        catalog
    }

    /// Current committed snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.load_full()
    }

    /// Primary + backups for a tier, in rank order, excluding cooled-down models
    ///
    /// Each returned descriptor carries the tracker's `cooldown_until` as of now.
    pub fn candidates(&self, tier: Tier) -> Vec<ModelDescriptor> {
        let snapshot = self.snapshot.load();
        snapshot
            .models(tier)
            .iter()
            .filter(|model| self.tracker.is_available(model.id()))
            .map(|model| {
                model
                    .clone()
                    .with_cooldown(self.tracker.cooldown_until(model.id()))
            })
            .collect()
    }

    /// Top-ranked model of a tier regardless of cooldown
    pub fn top_ranked(&self, tier: Tier) -> Option<ModelDescriptor> {
        self.snapshot.load().models(tier).first().cloned()
    }

    /// Rate-limit tracker shared with the router
    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    /// Query discovery and commit a new snapshot
    ///
    /// Waits for any refresh already in flight, then runs its own.
    ///
    /// # Errors
    /// Returns the discovery error; the previous snapshot stays committed.
    pub async fn refresh(&self) -> Result<RefreshReport, DiscoveryError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Manual refresh trigger
    ///
    /// Concurrent triggers coalesce: if a refresh is already running, this
    /// waits for it and reports whatever it committed instead of querying
    /// discovery a second time.
    ///
    /// # Errors
    /// Returns the discovery error when this call ran the refresh and it failed.
    pub async fn refresh_now(&self) -> Result<RefreshReport, DiscoveryError> {
        match self.refresh_lock.try_lock() {
            Ok(_guard) => self.refresh_locked().await,
            Err(_) => {
                tracing::debug!("Catalog refresh already in flight, waiting for it");
                let _guard = self.refresh_lock.lock().await;
                Ok(RefreshReport::from(self.snapshot.load().as_ref()))
            }
        }
    }

    async fn refresh_locked(&self) -> Result<RefreshReport, DiscoveryError> {
        let started = Instant::now();
        let result = match self.discovery.list_models().await {
            Ok(models) if models.is_empty() => Err(DiscoveryError::Empty),
            other => other,
        };

        let discovered = match result {
            Ok(models) => models,
            Err(e) => {
                let current = self.snapshot.load();
                tracing::warn!(
                    error = %e,
                    generation = current.generation,
                    "Catalog refresh failed, keeping previous snapshot"
                );
                self.observe(RefreshOutcome::Failure);
                return Err(e);
            }
        };

        let generation = self.snapshot.load().generation + 1;
        let snapshot = self.build_snapshot(discovered, generation, Some(Utc::now()));
        let report = RefreshReport::from(&snapshot);
        self.snapshot.store(Arc::new(snapshot));
        self.observe(RefreshOutcome::Success);

        tracing::info!(
            generation = report.generation,
            free = report.models.get(&Tier::Free).copied().unwrap_or(0),
            cheap = report.models.get(&Tier::Cheap).copied().unwrap_or(0),
            premium = report.models.get(&Tier::Premium).copied().unwrap_or(0),
            duration_ms = started.elapsed().as_millis() as u64,
            "Catalog refreshed"
        );

        Ok(report)
    }

    fn observe(&self, outcome: RefreshOutcome) {
        if let Err(e) = self.metrics.record_catalog_refresh(outcome) {
            tracing::warn!(error = %e, "Failed to record catalog refresh metric");
            self.metrics.metrics_recording_failure("record_catalog_refresh");
        }
    }

    /// Tier assignment: explicit hint, then price
    fn classify(&self, model: &DiscoveredModel) -> Tier {
        if let Some(tier) = model.tier_hint {
            return tier;
        }
        let cost = model.cost_per_token();
        if cost <= 0.0 {
            Tier::Free
        } else if cost <= self.cheap_max_cost_per_token {
            Tier::Cheap
        } else {
            Tier::Premium
        }
    }

    fn build_snapshot(
        &self,
        discovered: Vec<DiscoveredModel>,
        generation: u64,
        refreshed_at: Option<DateTime<Utc>>,
    ) -> CatalogSnapshot {
        let mut seen: HashSet<ModelId> = self.pinned.iter().map(|m| m.id().clone()).collect();
        let mut by_tier: BTreeMap<Tier, Vec<DiscoveredModel>> = BTreeMap::new();

        for model in discovered {
            let Ok(id) = ModelId::new(model.id.clone()) else {
                tracing::debug!(model_id = %model.id, "Skipping discovered model with invalid id");
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            by_tier.entry(self.classify(&model)).or_default().push(model);
        }

        let retained = self.top_n + self.backups;
        let mut tiers = BTreeMap::new();
        for tier in Tier::ALL {
            let mut models: Vec<ModelDescriptor> = self
                .pinned
                .iter()
                .filter(|m| m.tier() == tier)
                .cloned()
                .collect();

            let mut found = by_tier.remove(&tier).unwrap_or_default();
            found.sort_by(capability_order);
            models.extend(found.into_iter().take(retained).map(|m| {
                ModelDescriptor::new(m.id.clone(), tier, m.cost_per_token(), m.context_window, 0)
            }));

            let models: Vec<ModelDescriptor> = models
                .into_iter()
                .enumerate()
                .map(|(i, m)| m.with_rank(i as u32 + 1))
                .collect();
            if !models.is_empty() {
                tiers.insert(tier, models);
            }
        }

        CatalogSnapshot {
            generation,
            refreshed_at,
            tiers,
        }
    }

    /// Start the periodic refresh loop
    ///
    /// The first refresh happens one `interval` after the call; run
    /// [`refresh`](Self::refresh) at startup for an immediate one.
    pub fn start_background_refresh(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Starting background catalog refresh"
            );

            loop {
                tokio::time::sleep(interval).await;

                tracing::debug!("Running scheduled catalog refresh");
                // Failures are logged inside refresh and keep the old snapshot
                let _ = self.refresh().await;
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => {
                    tracing::error!(
                        "Background catalog refresh task terminated unexpectedly. \
                        The catalog will keep serving its last snapshot."
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Background catalog refresh task panicked. \
                        The catalog will keep serving its last snapshot."
                    );
                }
            }
        });
    }
}

/// Larger context window first, then most recently listed, then id
fn capability_order(a: &DiscoveredModel, b: &DiscoveredModel) -> Ordering {
    b.context_window
        .cmp(&a.context_window)
        .then_with(|| b.created.unwrap_or(i64::MIN).cmp(&a.created.unwrap_or(i64::MIN)))
        .then_with(|| a.id.cmp(&b.id))
}
