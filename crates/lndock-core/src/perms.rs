use std::collections::HashSet;

use crate::error::PoolError;
use crate::macaroon::Macaroon;

const PERMISSIONS_KEY: &str = "permissions";
const WILDCARD: &str = "*";

/// Capability set derived once from a session's macaroon.
///
/// First-party caveats are text of the form `k1 = v1 | k2 = v2 | ...`; only
/// `permissions` keys contribute, their value being a comma-separated list
/// of `entity:action` tokens. Extraction is best-effort: malformed clauses
/// and tokens are skipped.
pub struct PermissionManager {
    granted: HashSet<(String, String)>,
}

impl PermissionManager {
    pub fn from_macaroon(macaroon: &Macaroon) -> Self {
        let mut granted = HashSet::new();
        for caveat in macaroon.first_party_caveats() {
            let Ok(text) = std::str::from_utf8(&caveat.identifier) else {
                continue;
            };
            collect_permissions(text, &mut granted);
        }
        Self { granted }
    }

    /// Answers whether `requested` (an `entity:action` pair) is covered by
    /// the capability set, honoring `*` wildcards on either side.
    pub fn check(&self, requested: &str) -> Result<bool, PoolError> {
        let (entity, action) = split_pair(requested)
            .ok_or_else(|| PoolError::BadPermission(requested.to_string()))?;
        Ok(self.granted(entity, action)
            || self.granted(entity, WILDCARD)
            || self.granted(WILDCARD, action)
            || self.granted(WILDCARD, WILDCARD))
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }

    fn granted(&self, entity: &str, action: &str) -> bool {
        self.granted
            .contains(&(entity.to_string(), action.to_string()))
    }
}

fn collect_permissions(caveat: &str, out: &mut HashSet<(String, String)>) {
    for clause in caveat.split('|') {
        let Some((key, value)) = clause.split_once('=') else {
            continue;
        };
        if key.trim() != PERMISSIONS_KEY {
            continue;
        }
        for token in value.split(',') {
            if let Some((entity, action)) = split_pair(token) {
                out.insert((entity.to_string(), action.to_string()));
            }
        }
    }
}

fn split_pair(token: &str) -> Option<(&str, &str)> {
    let (entity, action) = token.trim().split_once(':')?;
    let (entity, action) = (entity.trim(), action.trim());
    if entity.is_empty() || action.is_empty() {
        return None;
    }
    Some((entity, action))
}
