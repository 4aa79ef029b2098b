//! Add-only reconciliation of child resources.

use crate::adapters::{LegacySource, ModernStore};
use crate::error::EntityError;
use crate::migrator::model::{MemberId, TargetResource};
use crate::migrator::reference::ReferenceCache;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: u64,
    /// Always zero: resources removed upstream are kept.
    pub removed: u64,
}

/// Insert every legacy resource missing from the modernized set, keyed by
/// normalized member id and resolved role id.
pub fn reconcile(
    legacy: &dyn LegacySource,
    modern: &dyn ModernStore,
    cache: &ReferenceCache,
    legacy_id: i64,
    target_id: &str,
) -> Result<ReconcileReport, EntityError> {
    let wanted = legacy
        .get_child_records(legacy_id)
        .map_err(EntityError::Upstream)?;
    let mut present: HashSet<(MemberId, String)> = modern
        .list_children(target_id)
        .map_err(EntityError::Store)?
        .iter()
        .map(TargetResource::key)
        .collect();

    let mut report = ReconcileReport::default();
    for resource in wanted {
        let role_id = cache.resolve_role(resource.role_code)?.to_string();
        let key = (resource.member_id.clone(), role_id.clone());
        if present.contains(&key) {
            continue;
        }
        modern
            .upsert_child(&TargetResource {
                id: None,
                challenge_id: target_id.to_string(),
                member_id: resource.member_id,
                member_handle: resource.member_handle,
                role_id,
            })
            .map_err(EntityError::Store)?;
        present.insert(key);
        report.added += 1;
    }
    if report.added > 0 {
        tracing::debug!(legacy_id, target_id, added = report.added, "resources reconciled");
    }
    Ok(report)
}
