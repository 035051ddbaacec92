//! Automatic update target selection
//!
//! Independent of the graph search: picks, among the automatic update
//! edges whose source range matches the current version, the one with
//! the highest target version. A greedy "jump as far as allowed"
//! rather than a shortest path, used by the auto-upgrade control loop.

use crate::error::VersionError;
use crate::matcher::{parse_version, Matcher, SemverMatcher};
use crate::types::MasterUpdate;

/// Returns the automatic update with the highest target version whose
/// source range matches `current` and whose target is strictly newer
/// than `current`. `None` when nothing applies.
pub fn best_automatic_update(
    current: &str,
    updates: &[MasterUpdate],
) -> Result<Option<MasterUpdate>, VersionError> {
    let current_version = parse_version(current)?;
    let matcher = SemverMatcher;

    let mut best: Option<(semver::Version, &MasterUpdate)> = None;
    for update in updates {
        if !update.automatic || !update.enabled {
            continue;
        }
        if !matcher.matches(&update.from, current)? {
            continue;
        }
        let to = parse_version(&update.to)?;
        if to <= current_version {
            continue;
        }
        let better = match &best {
            Some((best_to, _)) => to > *best_to,
            None => true,
        };
        if better {
            best = Some((to, update));
        }
    }
    Ok(best.map(|(_, u)| u.clone()))
}
