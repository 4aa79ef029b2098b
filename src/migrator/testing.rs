//! Shared fixtures for unit tests.

use crate::adapters::Adapters;
use crate::adapters::memory::{LegacyFixture, MemoryLegacySource, MemoryModernStore};
use crate::migrator::config::MigratorConfig;
use crate::migrator::controller::CancelSignal;
use crate::migrator::model::{
    ChallengeTypeRef, LegacyChallenge, LegacyMetadata, LegacyPhase, LegacyResource, LegacyTerm,
    MemberId, ResourceRoleRef, TargetChallenge, TimelineTemplateRef,
};
use crate::migrator::paths::{MigratorPaths, test_paths};
use crate::migrator::pipeline::Engine;
use crate::migrator::progress::ProgressStore;
use chrono::{TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

pub const TYPE_CODE: i64 = 1;
pub const TYPE_ID: &str = "927abff4-7af9-4145-8ba1-577c16e64e2e";
pub const TIMELINE_ID: &str = "7ebf1c69-f62f-4d3a-bdfb-fe9ddb56861c";
pub const SUBMITTER_CODE: i64 = 1;
pub const SUBMITTER_ROLE: &str = "732339e7-8e30-49d7-9198-cccf9451e221";
pub const REVIEWER_CODE: i64 = 4;
pub const REVIEWER_ROLE: &str = "0e9c6879-39e4-4eb6-b8df-92407890faf1";

pub fn legacy_challenge(legacy_id: i64, modified_at: &str) -> LegacyChallenge {
    LegacyChallenge {
        legacy_id,
        name: format!("Challenge {legacy_id}"),
        description: Some(format!("Build feature {legacy_id}")),
        type_code: TYPE_CODE,
        track: Some("DEVELOP".into()),
        status: "Active".into(),
        created_at: "2023-12-01 09:00:00".into(),
        created_by: Some("tcwebservice".into()),
        modified_at: modified_at.into(),
        modified_by: Some("tcwebservice".into()),
        phases: vec![
            LegacyPhase {
                phase_type_id: 1,
                name: "Registration".into(),
                scheduled_start: Some("2023-12-02 00:00:00".into()),
                scheduled_end: Some("2023-12-05 00:00:00".into()),
                actual_start: Some("2023-12-02 00:00:00".into()),
                actual_end: None,
                duration_secs: Some(259_200),
                is_open: true,
            },
            LegacyPhase {
                phase_type_id: 2,
                name: "Submission".into(),
                scheduled_start: Some("2023-12-02 00:05:00".into()),
                scheduled_end: Some("2023-12-06 00:00:00".into()),
                actual_start: None,
                actual_end: None,
                duration_secs: Some(345_300),
                is_open: false,
            },
        ],
        metadata: vec![LegacyMetadata {
            name: "submissionLimit".into(),
            value: "1".into(),
        }],
        tags: vec!["rust".into()],
        group_ids: vec![20_000_000],
        terms: vec![LegacyTerm {
            term_id: 21_303,
            role_code: SUBMITTER_CODE,
        }],
        events: Vec::new(),
        winners: Vec::new(),
        num_submissions: 2,
        num_registrants: 5,
    }
}

pub fn legacy_resources(legacy_id: i64) -> Vec<LegacyResource> {
    vec![
        LegacyResource {
            member_id: MemberId::from(1_000 + legacy_id),
            member_handle: Some(format!("coder{legacy_id}")),
            role_code: SUBMITTER_CODE,
        },
        LegacyResource {
            member_id: MemberId::from(2_000 + legacy_id),
            member_handle: Some(format!("reviewer{legacy_id}")),
            role_code: REVIEWER_CODE,
        },
    ]
}

/// Legacy fixture holding one challenge (with two resources) per entry, plus
/// reference rows that resolve every code the challenges use.
pub fn fixture(entries: &[(i64, &str)]) -> LegacyFixture {
    let mut resources = BTreeMap::new();
    let challenges = entries
        .iter()
        .map(|(id, modified)| {
            resources.insert(*id, legacy_resources(*id));
            legacy_challenge(*id, modified)
        })
        .collect();
    LegacyFixture {
        challenges,
        resources,
        orphan_listings: Vec::new(),
        types: vec![ChallengeTypeRef {
            id: TYPE_ID.into(),
            legacy_code: TYPE_CODE,
            name: "Challenge".into(),
        }],
        roles: vec![
            ResourceRoleRef {
                id: SUBMITTER_ROLE.into(),
                legacy_code: SUBMITTER_CODE,
                name: "Submitter".into(),
            },
            ResourceRoleRef {
                id: REVIEWER_ROLE.into(),
                legacy_code: REVIEWER_CODE,
                name: "Reviewer".into(),
            },
        ],
        timeline_templates: vec![TimelineTemplateRef {
            id: TIMELINE_ID.into(),
            type_code: TYPE_CODE,
            name: "Standard Code".into(),
        }],
    }
}

pub fn target(legacy_id: i64) -> TargetChallenge {
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    TargetChallenge {
        id: None,
        legacy_id,
        type_id: TYPE_ID.into(),
        timeline_template_id: TIMELINE_ID.into(),
        track: Some("DEVELOP".into()),
        name: format!("Challenge {legacy_id}"),
        description: None,
        status: "Active".into(),
        phases: Vec::new(),
        metadata: Vec::new(),
        tags: Vec::new(),
        groups: Vec::new(),
        terms: Vec::new(),
        events: Vec::new(),
        winners: Vec::new(),
        num_of_submissions: 0,
        num_of_registrants: 0,
        created: at,
        created_by: None,
        updated: at,
        updated_by: None,
    }
}

/// Temp home, in-memory adapters and a progress store wired together.
pub struct Harness {
    _tmp: TempDir,
    pub paths: MigratorPaths,
    pub cfg: MigratorConfig,
    pub legacy: Arc<MemoryLegacySource>,
    pub modern: Arc<MemoryModernStore>,
    pub progress: Arc<ProgressStore>,
}

impl Harness {
    pub fn new(entries: &[(i64, &str)]) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let mut cfg = MigratorConfig::default();
        cfg.legacy.page_size = 2;
        cfg.sync.page_size = 2;
        let progress = Arc::new(ProgressStore::open(&paths).expect("progress store"));
        Self {
            _tmp: tmp,
            paths,
            cfg,
            legacy: Arc::new(MemoryLegacySource::new(fixture(entries))),
            modern: Arc::new(MemoryModernStore::default()),
            progress,
        }
    }

    pub fn adapters(&self) -> Adapters {
        Adapters {
            legacy: self.legacy.clone(),
            modern: self.modern.clone(),
            reference: self.legacy.clone(),
        }
    }

    pub fn engine(&self) -> Engine {
        Engine::prepare(
            self.paths.clone(),
            self.cfg.clone(),
            self.adapters(),
            Arc::clone(&self.progress),
            CancelSignal::new(&self.paths),
        )
        .expect("engine")
    }
}
