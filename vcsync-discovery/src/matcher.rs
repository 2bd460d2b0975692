//! Identity resolution between remote and local resources.
//!
//! Remote resources carry no stable identifier; identity is inferred from a
//! UUID-shaped name suffix, the discovery prefix convention, or per-domain
//! attribute indices. A local candidate can be claimed at most once per pass.

use std::collections::{HashMap, HashSet};

use tracing::warn;
use uuid::Uuid;

/// Split a trailing 36-character UUID off a resource name.
///
/// Names like `mynet-5ca1ab1e-...` are produced when another installation
/// appends its own network id to the port group name. Returns the UUID and
/// the base name with the separator dropped; a bare UUID yields an empty
/// base.
pub fn split_uuid_suffix(name: &str) -> Option<(String, String)> {
    if name.len() < 36 {
        return None;
    }
    let split_at = name.len() - 36;
    if !name.is_char_boundary(split_at) {
        return None;
    }
    let tail = &name[split_at..];
    if Uuid::try_parse(tail).is_err() {
        return None;
    }
    let base = if name.len() == 36 {
        String::new()
    } else {
        let base_end = name.len() - 37;
        if !name.is_char_boundary(base_end) {
            return None;
        }
        name[..base_end].to_string()
    };
    Some((tail.to_string(), base))
}

/// Apply the domain's discovery prefix to a remote name.
pub fn discovered_name(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name)
}

/// Whether a local name carries the discovery prefix (origin `discovered`).
pub fn is_discovered(prefix: &str, name: &str) -> bool {
    !prefix.is_empty() && name.starts_with(prefix)
}

/// Result of trying to claim a local candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Candidate id, now claimed by the caller.
    Matched(String),
    /// The candidate was already claimed by an earlier remote resource.
    Collision(String),
    NoMatch,
}

/// Index over the local candidate set for one pass.
///
/// Both indices are built over the whole set up front because a later remote
/// item may want a candidate an earlier one already consumed. First claim
/// wins; subsequent claims report a collision and the caller falls through
/// to the create path.
#[derive(Debug, Default)]
pub struct CandidateIndex {
    by_uuid: HashMap<String, String>,
    by_name: HashMap<String, String>,
    claimed: HashSet<String>,
}

impl CandidateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: &str, uuid: Option<&str>, name: Option<&str>) {
        if let Some(uuid) = uuid {
            self.by_uuid.entry(uuid.to_string()).or_insert_with(|| id.to_string());
        }
        if let Some(name) = name {
            self.by_name.entry(name.to_string()).or_insert_with(|| id.to_string());
        }
    }

    pub fn claim_by_uuid(&mut self, uuid: &str) -> Claim {
        match self.by_uuid.get(uuid).cloned() {
            Some(id) => self.claim(id),
            None => Claim::NoMatch,
        }
    }

    pub fn claim_by_name(&mut self, name: &str) -> Claim {
        match self.by_name.get(name).cloned() {
            Some(id) => self.claim(id),
            None => Claim::NoMatch,
        }
    }

    fn claim(&mut self, id: String) -> Claim {
        if self.claimed.contains(&id) {
            warn!(candidate = %id, "candidate already matched in this pass, treating as unmatched");
            Claim::Collision(id)
        } else {
            self.claimed.insert(id.clone());
            Claim::Matched(id)
        }
    }

    /// Claim a candidate the caller already resolved by id.
    pub fn claim_id(&mut self, id: &str) -> Claim {
        self.claim(id.to_string())
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        self.claimed.contains(id)
    }
}
