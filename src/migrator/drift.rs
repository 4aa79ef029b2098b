use crate::migrator::model::{LegacyListing, TargetChallenge};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriftReason {
    Modified {
        legacy: DateTime<Utc>,
        modern: DateTime<Utc>,
    },
    Submissions {
        legacy: u64,
        modern: u64,
    },
    Registrants {
        legacy: u64,
        modern: u64,
    },
    Forced,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Modified { legacy, modern } => write!(
                f,
                "modified {} vs {}",
                legacy.to_rfc3339(),
                modern.to_rfc3339()
            ),
            Self::Submissions { legacy, modern } => write!(f, "submissions {legacy} vs {modern}"),
            Self::Registrants { legacy, modern } => write!(f, "registrants {legacy} vs {modern}"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// True when `legacy` is later than `known` by more than the tolerance.
/// Both sides are compared at whole-second precision.
pub fn modified_since(known: DateTime<Utc>, legacy: DateTime<Utc>, tolerance_secs: i64) -> bool {
    legacy.timestamp() - known.timestamp() > tolerance_secs.max(0)
}

/// Compare the legacy listing against the modernized copy. Any single
/// signal is enough to resync.
pub fn detect_drift(
    listing: &LegacyListing,
    target: &TargetChallenge,
    tolerance_secs: i64,
    force: bool,
) -> Vec<DriftReason> {
    let mut reasons = Vec::new();
    if force {
        reasons.push(DriftReason::Forced);
    }
    let skew = (listing.modified_at.timestamp() - target.updated.timestamp()).abs();
    if skew > tolerance_secs.max(0) {
        reasons.push(DriftReason::Modified {
            legacy: listing.modified_at,
            modern: target.updated,
        });
    }
    if listing.num_submissions != target.num_of_submissions {
        reasons.push(DriftReason::Submissions {
            legacy: listing.num_submissions,
            modern: target.num_of_submissions,
        });
    }
    if listing.num_registrants != target.num_of_registrants {
        reasons.push(DriftReason::Registrants {
            legacy: listing.num_registrants,
            modern: target.num_of_registrants,
        });
    }
    reasons
}
