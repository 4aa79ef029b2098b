//! Legacy and modernized record shapes exchanged with the adapters.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Member identifier normalized to its canonical decimal string. The legacy
/// side emits JSON numbers and the modernized side emits strings for the
/// same id; both deserialize into the same value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        match trimmed.parse::<i64>() {
            Ok(n) => Self(n.to_string()),
            Err(_) => Self(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for MemberId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MemberId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MemberId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MemberIdVisitor;

        impl Visitor<'_> for MemberIdVisitor {
            type Value = MemberId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a member id as integer or string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<MemberId, E> {
                Ok(MemberId::from(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<MemberId, E> {
                Ok(MemberId(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<MemberId, E> {
                if v.fract() == 0.0 && v.is_finite() {
                    Ok(MemberId((v as i64).to_string()))
                } else {
                    Err(E::custom(format!("member id {v} is not integral")))
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<MemberId, E> {
                if v.trim().is_empty() {
                    return Err(E::custom("member id is empty"));
                }
                Ok(MemberId::new(v))
            }
        }

        deserializer.deserialize_any(MemberIdVisitor)
    }
}

/// Legacy listing row: enough to order, page and drift-check without detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyListing {
    pub legacy_id: i64,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub num_submissions: u64,
    #[serde(default)]
    pub num_registrants: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyIdPage {
    pub total: u64,
    pub items: Vec<LegacyListing>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub legacy_id: Option<i64>,
}

impl LegacyFilter {
    pub fn for_id(legacy_id: i64) -> Self {
        Self {
            legacy_id: Some(legacy_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, listing: &LegacyListing) -> bool {
        if let Some(id) = self.legacy_id
            && listing.legacy_id != id
        {
            return false;
        }
        if let Some(start) = self.start_date
            && listing.modified_at < start
        {
            return false;
        }
        if let Some(end) = self.end_date
            && listing.modified_at > end
        {
            return false;
        }
        true
    }

    pub fn describe(&self) -> String {
        let fmt = |d: Option<DateTime<Utc>>| d.map(|d| d.to_rfc3339()).unwrap_or_else(|| "*".into());
        match self.legacy_id {
            Some(id) => format!("legacy_id={id}"),
            None => format!("window={}..{}", fmt(self.start_date), fmt(self.end_date)),
        }
    }
}

/// Raw legacy phase row. Dates stay strings until the builder parses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPhase {
    pub phase_type_id: i64,
    pub name: String,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    #[serde(default)]
    pub actual_start: Option<String>,
    #[serde(default)]
    pub actual_end: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTerm {
    pub term_id: i64,
    pub role_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEvent {
    pub event_id: i64,
    pub name: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWinner {
    pub member_id: MemberId,
    pub handle: String,
    pub placement: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyMetadata {
    pub name: String,
    pub value: String,
}

/// Full legacy challenge detail as returned by the legacy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyChallenge {
    pub legacy_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub type_code: i64,
    #[serde(default)]
    pub track: Option<String>,
    pub status: String,
    pub created_at: String,
    #[serde(default)]
    pub created_by: Option<String>,
    pub modified_at: String,
    #[serde(default)]
    pub modified_by: Option<String>,
    #[serde(default)]
    pub phases: Vec<LegacyPhase>,
    #[serde(default)]
    pub metadata: Vec<LegacyMetadata>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub group_ids: Vec<i64>,
    #[serde(default)]
    pub terms: Vec<LegacyTerm>,
    #[serde(default)]
    pub events: Vec<LegacyEvent>,
    #[serde(default)]
    pub winners: Vec<LegacyWinner>,
    #[serde(default)]
    pub num_submissions: u64,
    #[serde(default)]
    pub num_registrants: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResource {
    pub member_id: MemberId,
    #[serde(default)]
    pub member_handle: Option<String>,
    pub role_code: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPhase {
    pub legacy_phase_type_id: i64,
    pub name: String,
    pub scheduled_start_date: Option<DateTime<Utc>>,
    pub scheduled_end_date: Option<DateTime<Utc>>,
    pub actual_start_date: Option<DateTime<Utc>>,
    pub actual_end_date: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub is_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMetadata {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetTerm {
    pub id: String,
    pub role_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEvent {
    pub id: i64,
    pub name: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetWinner {
    pub user_id: MemberId,
    pub handle: String,
    pub placement: u32,
}

/// Modernized challenge document, identical in the document store and the
/// search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetChallenge {
    #[serde(default)]
    pub id: Option<String>,
    pub legacy_id: i64,
    pub type_id: String,
    pub timeline_template_id: String,
    #[serde(default)]
    pub track: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: String,
    #[serde(default)]
    pub phases: Vec<TargetPhase>,
    #[serde(default)]
    pub metadata: Vec<TargetMetadata>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub terms: Vec<TargetTerm>,
    #[serde(default)]
    pub events: Vec<TargetEvent>,
    #[serde(default)]
    pub winners: Vec<TargetWinner>,
    #[serde(default)]
    pub num_of_submissions: u64,
    #[serde(default)]
    pub num_of_registrants: u64,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl TargetChallenge {
    /// Overwrite the fields a resync is allowed to change. Identity, type and
    /// creation data stay as first migrated.
    pub fn apply_comparable(&mut self, rebuilt: TargetChallenge) {
        self.description = rebuilt.description;
        self.phases = rebuilt.phases;
        self.metadata = rebuilt.metadata;
        self.terms = rebuilt.terms;
        self.events = rebuilt.events;
        self.status = rebuilt.status;
        self.winners = rebuilt.winners;
        self.num_of_submissions = rebuilt.num_of_submissions;
        self.num_of_registrants = rebuilt.num_of_registrants;
        self.updated = rebuilt.updated;
        self.updated_by = rebuilt.updated_by;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResource {
    #[serde(default)]
    pub id: Option<String>,
    pub challenge_id: String,
    pub member_id: MemberId,
    #[serde(default)]
    pub member_handle: Option<String>,
    pub role_id: String,
}

impl TargetResource {
    pub fn key(&self) -> (MemberId, String) {
        (self.member_id.clone(), self.role_id.clone())
    }
}

/// Reference rows as served by the modernized API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeTypeRef {
    pub id: String,
    pub legacy_code: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRoleRef {
    pub id: String,
    pub legacy_code: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineTemplateRef {
    pub id: String,
    pub type_code: i64,
    #[serde(default)]
    pub name: String,
}
