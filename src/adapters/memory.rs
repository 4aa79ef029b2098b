//! In-memory adapters. Loaded from JSON fixtures for dry-runs and the CLI
//! integration tests; the modernized store can persist itself after each
//! write so successive CLI invocations see the same replica.

use crate::adapters::{LegacySource, ModernStore, ReferenceSource};
use crate::migrator::model::{
    ChallengeTypeRef, LegacyChallenge, LegacyFilter, LegacyIdPage, LegacyListing,
    LegacyResource, ResourceRoleRef, TargetChallenge, TargetResource, TimelineTemplateRef,
};
use crate::migrator::util::{
    challenge_doc_id, parse_legacy_datetime, resource_doc_id, write_atomic,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(test)]
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyFixture {
    pub challenges: Vec<LegacyChallenge>,
    /// Child resources keyed by legacy challenge id.
    pub resources: BTreeMap<i64, Vec<LegacyResource>>,
    /// Listed ids whose detail rows are gone.
    pub orphan_listings: Vec<LegacyListing>,
    pub types: Vec<ChallengeTypeRef>,
    pub roles: Vec<ResourceRoleRef>,
    pub timeline_templates: Vec<TimelineTemplateRef>,
}

#[derive(Default)]
pub struct MemoryLegacySource {
    data: Mutex<LegacyFixture>,
}

impl MemoryLegacySource {
    pub fn new(fixture: LegacyFixture) -> Self {
        Self {
            data: Mutex::new(fixture),
        }
    }

    pub fn from_fixture(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read legacy fixture {}", path.display()))?;
        let fixture: LegacyFixture = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse legacy fixture {}", path.display()))?;
        Ok(Self::new(fixture))
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut LegacyFixture) -> T) -> T {
        let mut data = self.data.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut data)
    }

    #[cfg(test)]
    pub fn upsert_challenge(&self, challenge: LegacyChallenge) {
        self.with_data(|data| {
            data.challenges.retain(|c| c.legacy_id != challenge.legacy_id);
            data.challenges.push(challenge);
        });
    }

    #[cfg(test)]
    pub fn set_resources(&self, legacy_id: i64, resources: Vec<LegacyResource>) {
        self.with_data(|data| {
            data.resources.insert(legacy_id, resources);
        });
    }

    #[cfg(test)]
    pub fn remove_detail(&self, legacy_id: i64) -> Option<LegacyChallenge> {
        self.with_data(|data| {
            let pos = data.challenges.iter().position(|c| c.legacy_id == legacy_id)?;
            let removed = data.challenges.remove(pos);
            if let Some(listing) = listing_for(&removed) {
                data.orphan_listings.push(listing);
            }
            Some(removed)
        })
    }
}

fn listing_for(challenge: &LegacyChallenge) -> Option<LegacyListing> {
    let Some(modified_at) = parse_legacy_datetime(&challenge.modified_at) else {
        tracing::warn!(
            legacy_id = challenge.legacy_id,
            modified_at = %challenge.modified_at,
            "fixture challenge has unparseable modified date; not listed"
        );
        return None;
    };
    Some(LegacyListing {
        legacy_id: challenge.legacy_id,
        modified_at,
        num_submissions: challenge.num_submissions,
        num_registrants: challenge.num_registrants,
    })
}

impl LegacySource for MemoryLegacySource {
    fn list_ids(&self, filter: &LegacyFilter, page_size: u64, page: u64) -> Result<LegacyIdPage> {
        let page_size = page_size.max(1);
        let page = page.max(1);
        self.with_data(|data| {
            let mut listings = data
                .challenges
                .iter()
                .filter_map(listing_for)
                .chain(data.orphan_listings.iter().cloned())
                .filter(|l| filter.matches(l))
                .collect::<Vec<_>>();
            listings.sort_by_key(|l| (l.modified_at, l.legacy_id));
            let total = listings.len() as u64;
            let items = listings
                .into_iter()
                .skip(usize::try_from((page - 1).saturating_mul(page_size)).unwrap_or(usize::MAX))
                .take(usize::try_from(page_size).unwrap_or(usize::MAX))
                .collect();
            Ok(LegacyIdPage { total, items })
        })
    }

    fn get_detail(&self, legacy_id: i64) -> Result<Option<LegacyChallenge>> {
        Ok(self.with_data(|data| {
            data.challenges
                .iter()
                .find(|c| c.legacy_id == legacy_id)
                .cloned()
        }))
    }

    fn get_child_records(&self, legacy_id: i64) -> Result<Vec<LegacyResource>> {
        Ok(self.with_data(|data| data.resources.get(&legacy_id).cloned().unwrap_or_default()))
    }
}

impl ReferenceSource for MemoryLegacySource {
    fn list_types(&self) -> Result<Vec<ChallengeTypeRef>> {
        Ok(self.with_data(|data| data.types.clone()))
    }

    fn list_roles(&self) -> Result<Vec<ResourceRoleRef>> {
        Ok(self.with_data(|data| data.roles.clone()))
    }

    fn list_timeline_templates(&self) -> Result<Vec<TimelineTemplateRef>> {
        Ok(self.with_data(|data| data.timeline_templates.clone()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModernSnapshot {
    pub challenges: BTreeMap<String, TargetChallenge>,
    pub resources: BTreeMap<String, TargetResource>,
}

#[derive(Default)]
pub struct MemoryModernStore {
    state: Mutex<ModernSnapshot>,
    persist_to: Option<PathBuf>,
    writes: AtomicU64,
    #[cfg(test)]
    failing: Mutex<BTreeSet<i64>>,
}

impl MemoryModernStore {
    pub fn persisted_at(path: &Path) -> Result<Self> {
        let snapshot = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read modern fixture {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse modern fixture {}", path.display()))?
        } else {
            ModernSnapshot::default()
        };
        Ok(Self {
            state: Mutex::new(snapshot),
            persist_to: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// Number of create/update/delete calls that reached the store.
    #[cfg(test)]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> ModernSnapshot {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Make every write touching `legacy_id` fail, standing in for an outage.
    #[cfg(test)]
    pub fn fail_writes_for(&self, legacy_id: i64) {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(legacy_id);
    }

    #[cfg(test)]
    fn is_failing(&self, legacy_id: i64) -> bool {
        self.failing
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&legacy_id)
    }

    #[cfg(not(test))]
    fn is_failing(&self, _legacy_id: i64) -> bool {
        false
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut ModernSnapshot) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let out = f(&mut state)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = &self.persist_to {
            let data = serde_json::to_string_pretty(&*state)?;
            write_atomic(path, &format!("{data}\n"))?;
        }
        Ok(out)
    }
}

impl ModernStore for MemoryModernStore {
    fn upsert(&self, challenge: &TargetChallenge) -> Result<String> {
        if self.is_failing(challenge.legacy_id) {
            anyhow::bail!("search index rejected challenge {}", challenge.legacy_id);
        }
        self.mutate(|state| {
            let id = challenge
                .id
                .clone()
                .unwrap_or_else(|| challenge_doc_id(challenge.legacy_id));
            let mut stored = challenge.clone();
            stored.id = Some(id.clone());
            state.challenges.insert(id.clone(), stored);
            Ok(id)
        })
    }

    fn delete(&self, target_id: &str) -> Result<()> {
        self.mutate(|state| {
            if state.challenges.remove(target_id).is_none() {
                tracing::debug!(target_id, "challenge already absent; delete is a no-op");
            }
            state.resources.retain(|_, r| r.challenge_id != target_id);
            Ok(())
        })
    }

    fn read_by_legacy_id(&self, legacy_id: i64) -> Result<Option<TargetChallenge>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state
            .challenges
            .values()
            .find(|c| c.legacy_id == legacy_id)
            .cloned())
    }

    fn upsert_child(&self, resource: &TargetResource) -> Result<()> {
        self.mutate(|state| {
            let Some(parent) = state.challenges.get(&resource.challenge_id) else {
                anyhow::bail!("parent challenge {} not found", resource.challenge_id);
            };
            let legacy_id = parent.legacy_id;
            if self.is_failing(legacy_id) {
                anyhow::bail!("resource index rejected child of challenge {legacy_id}");
            }
            let id = resource.id.clone().unwrap_or_else(|| {
                resource_doc_id(
                    &resource.challenge_id,
                    resource.member_id.as_str(),
                    &resource.role_id,
                )
            });
            let mut stored = resource.clone();
            stored.id = Some(id.clone());
            state.resources.insert(id, stored);
            Ok(())
        })
    }

    fn list_children(&self, target_id: &str) -> Result<Vec<TargetResource>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state
            .resources
            .values()
            .filter(|r| r.challenge_id == target_id)
            .cloned()
            .collect())
    }
}
