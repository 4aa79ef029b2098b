//! Legacy code to modernized id maps, loaded once per run and read-only after.

use crate::adapters::ReferenceSource;
use crate::error::{ErrorCode, LookupError};
use anyhow::{Context, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    types: HashMap<i64, String>,
    roles: HashMap<i64, String>,
    timelines: HashMap<i64, String>,
}

fn insert_first(map: &mut HashMap<i64, String>, table: &str, code: i64, id: String) {
    if let Some(existing) = map.get(&code) {
        if *existing != id {
            tracing::warn!(table, code, kept = %existing, ignored = %id, "duplicate legacy code in reference data");
        }
        return;
    }
    map.insert(code, id);
}

impl ReferenceCache {
    pub fn load(source: &dyn ReferenceSource) -> Result<Self> {
        let code = ErrorCode::E004ReferenceLoad.as_str();
        let types = source
            .list_types()
            .with_context(|| format!("{code}: failed to load challenge types"))?;
        let roles = source
            .list_roles()
            .with_context(|| format!("{code}: failed to load resource roles"))?;
        let timelines = source
            .list_timeline_templates()
            .with_context(|| format!("{code}: failed to load timeline templates"))?;

        if types.is_empty() {
            anyhow::bail!("{code}: reference source returned no challenge types");
        }

        let mut cache = Self::default();
        for row in types {
            insert_first(&mut cache.types, "challenge-types", row.legacy_code, row.id);
        }
        for row in roles {
            insert_first(&mut cache.roles, "resource-roles", row.legacy_code, row.id);
        }
        for row in timelines {
            insert_first(&mut cache.timelines, "timeline-templates", row.type_code, row.id);
        }
        tracing::info!(
            types = cache.types.len(),
            roles = cache.roles.len(),
            timelines = cache.timelines.len(),
            "reference data loaded"
        );
        Ok(cache)
    }

    pub fn resolve_type(&self, code: i64) -> Result<&str, LookupError> {
        self.types
            .get(&code)
            .map(String::as_str)
            .ok_or(LookupError::Type(code))
    }

    pub fn resolve_role(&self, code: i64) -> Result<&str, LookupError> {
        self.roles
            .get(&code)
            .map(String::as_str)
            .ok_or(LookupError::Role(code))
    }

    /// Timeline templates are keyed by the legacy challenge type code.
    pub fn resolve_timeline(&self, type_code: i64) -> Result<&str, LookupError> {
        self.timelines
            .get(&type_code)
            .map(String::as_str)
            .ok_or(LookupError::Timeline(type_code))
    }
}
