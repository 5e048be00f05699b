//! Conflict resolution between sources offering the same package

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::SourceType;

/// Rule used to pick a winning source for a package offered more than once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictResolution {
    /// Lowest priority number wins
    #[default]
    Priority,
    /// Highest version wins
    LatestVersion,
    /// Local sources win, then priority
    LocalFirst,
    /// Remote sources win, then priority
    RemoteFirst,
}

impl ConflictResolution {
    /// Whether a newly seen candidate should replace the current winner
    pub(crate) fn should_replace(&self, current: &Candidate<'_>, new: &Candidate<'_>) -> bool {
        match self {
            ConflictResolution::Priority => new.priority < current.priority,
            ConflictResolution::LatestVersion => {
                compare_versions(new.version, current.version) == Ordering::Greater
            }
            ConflictResolution::LocalFirst => prefer_type(SourceType::Local, current, new),
            ConflictResolution::RemoteFirst => prefer_type(SourceType::Remote, current, new),
        }
    }
}

fn prefer_type(preferred: SourceType, current: &Candidate<'_>, new: &Candidate<'_>) -> bool {
    if current.source_type == Some(preferred) {
        return false;
    }
    if new.source_type == Some(preferred) {
        return true;
    }
    new.priority < current.priority
}

/// The facts a policy looks at for one side of a conflict
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate<'a> {
    pub priority: i64,
    pub version: &'a str,
    pub source_type: Option<SourceType>,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictResolution::Priority => "priority",
            ConflictResolution::LatestVersion => "latest-version",
            ConflictResolution::LocalFirst => "local-first",
            ConflictResolution::RemoteFirst => "remote-first",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priority" => Ok(ConflictResolution::Priority),
            "latest-version" => Ok(ConflictResolution::LatestVersion),
            "local-first" => Ok(ConflictResolution::LocalFirst),
            "remote-first" => Ok(ConflictResolution::RemoteFirst),
            other => Err(format!(
                "Unknown conflict resolution '{other}'. Expected one of: priority, latest-version, local-first, remote-first"
            )),
        }
    }
}

/// Compare two version strings
///
/// Versions that both parse as semver use semver ordering, so `1.0.0-rc1`
/// sorts below `1.0.0`. Anything else is compared segment by segment on
/// dots, missing segments count as 0, and each segment compares its leading
/// digits numerically before falling back to the remaining suffix (a bare
/// number outranks the same number with a suffix).
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if let (Ok(va), Ok(vb)) = (semver::Version::parse(a), semver::Version::parse(b)) {
        return va.cmp(&vb);
    }

    let parts_a: Vec<&str> = a.split('.').collect();
    let parts_b: Vec<&str> = b.split('.').collect();

    for i in 0..parts_a.len().max(parts_b.len()) {
        let seg_a = parts_a.get(i).copied().unwrap_or("0");
        let seg_b = parts_b.get(i).copied().unwrap_or("0");
        let ord = compare_segment(seg_a, seg_b);
        if ord != Ordering::Equal {
            return ord;
        }
    }

    Ordering::Equal
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    let (num_a, rest_a) = split_numeric(a);
    let (num_b, rest_b) = split_numeric(b);

    num_a.cmp(&num_b).then_with(|| match (rest_a.is_empty(), rest_b.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => rest_a.cmp(rest_b),
    })
}

fn split_numeric(segment: &str) -> (u64, &str) {
    let digits = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    let number = segment[..digits].parse::<u64>().unwrap_or(0);
    (number, &segment[digits..])
}
