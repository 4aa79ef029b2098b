pub mod http;
pub mod memory;

use crate::migrator::config::{BackendKind, MigratorConfig};
use crate::migrator::model::{
    ChallengeTypeRef, LegacyChallenge, LegacyFilter, LegacyIdPage, LegacyResource,
    ResourceRoleRef, TargetChallenge, TargetResource, TimelineTemplateRef,
};
use anyhow::Result;
use std::sync::Arc;

/// Read-only access to the legacy system of record.
pub trait LegacySource: Send + Sync {
    /// Listings matching `filter`, ordered by modification time ascending.
    /// `page` is 1-based.
    fn list_ids(&self, filter: &LegacyFilter, page_size: u64, page: u64) -> Result<LegacyIdPage>;

    fn get_detail(&self, legacy_id: i64) -> Result<Option<LegacyChallenge>>;

    fn get_child_records(&self, legacy_id: i64) -> Result<Vec<LegacyResource>>;
}

/// Dual-write view over the document store and the search index.
pub trait ModernStore: Send + Sync {
    /// Create or replace the challenge in both stores, returning its id.
    fn upsert(&self, challenge: &TargetChallenge) -> Result<String>;

    fn delete(&self, target_id: &str) -> Result<()>;

    /// Read path against the search index.
    fn read_by_legacy_id(&self, legacy_id: i64) -> Result<Option<TargetChallenge>>;

    fn upsert_child(&self, resource: &TargetResource) -> Result<()>;

    fn list_children(&self, target_id: &str) -> Result<Vec<TargetResource>>;
}

pub trait ReferenceSource: Send + Sync {
    fn list_types(&self) -> Result<Vec<ChallengeTypeRef>>;

    fn list_roles(&self) -> Result<Vec<ResourceRoleRef>>;

    fn list_timeline_templates(&self) -> Result<Vec<TimelineTemplateRef>>;
}

#[derive(Clone)]
pub struct Adapters {
    pub legacy: Arc<dyn LegacySource>,
    pub modern: Arc<dyn ModernStore>,
    pub reference: Arc<dyn ReferenceSource>,
}

pub fn build(cfg: &MigratorConfig) -> Result<Adapters> {
    match cfg.backend.kind {
        BackendKind::Http => {
            let client = Arc::new(http::ApiClient::new(cfg)?);
            Ok(Adapters {
                legacy: Arc::new(http::HttpLegacySource::new(
                    Arc::clone(&client),
                    &cfg.legacy.base_url,
                )),
                modern: Arc::new(http::HttpModernStore::new(Arc::clone(&client), &cfg.modern)),
                reference: Arc::new(http::HttpReferenceSource::new(client, cfg.reference_url())),
            })
        }
        BackendKind::Fixture => {
            let Some(legacy_path) = cfg.backend.fixture_legacy.as_deref() else {
                anyhow::bail!("fixture backend requires backend.fixture_legacy");
            };
            let legacy = Arc::new(memory::MemoryLegacySource::from_fixture(legacy_path)?);
            let modern = Arc::new(match cfg.backend.fixture_modern.as_deref() {
                Some(path) => memory::MemoryModernStore::persisted_at(path)?,
                None => memory::MemoryModernStore::default(),
            });
            Ok(Adapters {
                reference: legacy.clone(),
                legacy,
                modern,
            })
        }
    }
}
