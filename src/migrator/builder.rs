//! Pure transformation of a legacy challenge into the modernized document.

use crate::error::EntityError;
use crate::migrator::model::{
    LegacyChallenge, LegacyPhase, TargetChallenge, TargetEvent, TargetMetadata, TargetPhase,
    TargetTerm, TargetWinner,
};
use crate::migrator::reference::ReferenceCache;
use crate::migrator::util::parse_legacy_datetime;
use chrono::{DateTime, Utc};

fn required_date(legacy_id: i64, field: &str, raw: &str) -> Result<DateTime<Utc>, EntityError> {
    parse_legacy_datetime(raw).ok_or_else(|| {
        EntityError::malformed(format!(
            "challenge {legacy_id}: {field} {raw:?} is not a valid timestamp"
        ))
    })
}

fn optional_date(
    legacy_id: i64,
    field: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, EntityError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => required_date(legacy_id, field, value).map(Some),
    }
}

/// Legacy status strings carry free-form suffixes (`Cancelled - ...`) and
/// inconsistent casing. Unknown values pass through trimmed.
pub fn normalize_status(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let status = match lower.as_str() {
        "" => return None,
        "active" => "Active",
        "draft" | "new" => "Draft",
        "completed" => "Completed",
        "deleted" => "Deleted",
        _ => return Some(trimmed.to_string()),
    };
    Some(status.to_string())
}

fn build_phase(legacy_id: i64, phase: &LegacyPhase) -> Result<TargetPhase, EntityError> {
    let field = |suffix: &str| format!("phase {} {suffix}", phase.name);
    Ok(TargetPhase {
        legacy_phase_type_id: phase.phase_type_id,
        name: phase.name.clone(),
        scheduled_start_date: optional_date(
            legacy_id,
            &field("scheduledStart"),
            phase.scheduled_start.as_deref(),
        )?,
        scheduled_end_date: optional_date(
            legacy_id,
            &field("scheduledEnd"),
            phase.scheduled_end.as_deref(),
        )?,
        actual_start_date: optional_date(
            legacy_id,
            &field("actualStart"),
            phase.actual_start.as_deref(),
        )?,
        actual_end_date: optional_date(legacy_id, &field("actualEnd"), phase.actual_end.as_deref())?,
        duration_secs: phase.duration_secs,
        is_open: phase.is_open,
    })
}

/// Build the target document. Any unresolved reference code or malformed
/// field fails the entity; nothing falls back to a default.
pub fn build_target(
    legacy: &LegacyChallenge,
    cache: &ReferenceCache,
) -> Result<TargetChallenge, EntityError> {
    let id = legacy.legacy_id;
    let type_id = cache.resolve_type(legacy.type_code)?.to_string();
    let timeline_template_id = cache.resolve_timeline(legacy.type_code)?.to_string();
    let status = normalize_status(&legacy.status)
        .ok_or_else(|| EntityError::malformed(format!("challenge {id}: empty status")))?;

    let phases = legacy
        .phases
        .iter()
        .map(|phase| build_phase(id, phase))
        .collect::<Result<Vec<_>, _>>()?;

    let terms = legacy
        .terms
        .iter()
        .map(|term| {
            Ok(TargetTerm {
                id: term.term_id.to_string(),
                role_id: cache.resolve_role(term.role_code)?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, EntityError>>()?;

    let mut winners = legacy
        .winners
        .iter()
        .map(|w| TargetWinner {
            user_id: w.member_id.clone(),
            handle: w.handle.clone(),
            placement: w.placement,
        })
        .collect::<Vec<_>>();
    winners.sort_by_key(|w| w.placement);

    Ok(TargetChallenge {
        id: None,
        legacy_id: id,
        type_id,
        timeline_template_id,
        track: legacy.track.as_ref().map(|t| t.trim().to_ascii_uppercase()),
        name: legacy.name.trim().to_string(),
        description: legacy.description.clone(),
        status,
        phases,
        metadata: legacy
            .metadata
            .iter()
            .map(|m| TargetMetadata {
                name: m.name.clone(),
                value: m.value.clone(),
            })
            .collect(),
        tags: legacy.tags.clone(),
        groups: legacy.group_ids.iter().map(i64::to_string).collect(),
        terms,
        events: legacy
            .events
            .iter()
            .map(|e| TargetEvent {
                id: e.event_id,
                name: e.name.clone(),
                key: e.key.clone(),
            })
            .collect(),
        winners,
        num_of_submissions: legacy.num_submissions,
        num_of_registrants: legacy.num_registrants,
        created: required_date(id, "createdAt", &legacy.created_at)?,
        created_by: legacy.created_by.clone(),
        updated: required_date(id, "modifiedAt", &legacy.modified_at)?,
        updated_by: legacy.modified_by.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryLegacySource;
    use crate::error::LookupError;
    use crate::migrator::testing;
    use chrono::TimeZone;

    fn cache() -> ReferenceCache {
        ReferenceCache::load(&MemoryLegacySource::new(testing::fixture(&[]))).expect("cache")
    }

    #[test]
    fn builds_resolved_document_preserving_phase_order() {
        let legacy = testing::legacy_challenge(101, "2024-01-01 00:00:05.0");
        let target = build_target(&legacy, &cache()).expect("build");
        assert_eq!(target.type_id, testing::TYPE_ID);
        assert_eq!(target.timeline_template_id, testing::TIMELINE_ID);
        assert_eq!(
            target.phases.iter().map(|p| (p.name.as_str(), p.is_open)).collect::<Vec<_>>(),
            vec![("Registration", true), ("Submission", false)]
        );
        assert_eq!(target.terms[0].role_id, testing::SUBMITTER_ROLE);
        assert_eq!(target.groups, vec!["20000000".to_string()]);
        assert_eq!(target.updated, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap());
        assert_eq!(target.num_of_registrants, 5);
    }

    #[test]
    fn unknown_type_is_a_lookup_error() {
        let mut legacy = testing::legacy_challenge(7, "2024-01-01 00:00:00");
        legacy.type_code = 38;
        let err = build_target(&legacy, &cache()).unwrap_err();
        assert!(matches!(err, EntityError::Lookup(LookupError::Type(38))));
    }

    #[test]
    fn unknown_term_role_is_a_lookup_error() {
        let mut legacy = testing::legacy_challenge(7, "2024-01-01 00:00:00");
        legacy.terms[0].role_code = 99;
        let err = build_target(&legacy, &cache()).unwrap_err();
        assert!(matches!(err, EntityError::Lookup(LookupError::Role(99))));
    }

    #[test]
    fn malformed_phase_date_names_the_field() {
        let mut legacy = testing::legacy_challenge(7, "2024-01-01 00:00:00");
        legacy.phases[1].scheduled_end = Some("next tuesday".into());
        let err = build_target(&legacy, &cache()).unwrap_err();
        assert_eq!(err.kind(), "malformed_data");
        assert!(err.to_string().contains("phase Submission scheduledEnd"));
    }

    #[test]
    fn statuses_normalize() {
        assert_eq!(normalize_status(" ACTIVE ").as_deref(), Some("Active"));
        assert_eq!(normalize_status("New").as_deref(), Some("Draft"));
        assert_eq!(
            normalize_status("Cancelled - Zero Submissions").as_deref(),
            Some("Cancelled - Zero Submissions")
        );
        assert_eq!(normalize_status("  "), None);
    }
}
