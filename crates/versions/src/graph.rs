//! Update path search over the version graph
//!
//! One node per known master version, one edge per declared update
//! whose endpoints resolve. Edge weight is uniform, so the shortest
//! path is the fewest-hop upgrade sequence.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tracing::warn;

use crate::error::VersionError;
use crate::matcher::Matcher;
use crate::types::{MasterUpdate, MasterVersion};

/// An update edge between two resolved catalogue versions.
#[derive(Debug, Clone)]
struct Edge {
    to: usize,
    update: MasterUpdate,
}

/// Shortest upgrade path search over the declared update edges.
#[derive(Debug, Clone)]
pub struct UpdatePathSearch {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    adjacency: Vec<Vec<Edge>>,
}

impl UpdatePathSearch {
    /// Builds the graph from the version catalogue and update list.
    ///
    /// Updates whose `from` expression resolves to no known version,
    /// whose expression does not parse, or whose `to` is unknown are
    /// dropped with a warning; a bad edge never fails construction.
    /// A version id that cannot be evaluated against an expression is
    /// skipped for that edge only, the remaining versions still
    /// resolve.
    pub fn new<'a, I, M>(versions: I, updates: &[MasterUpdate], matcher: &M) -> Self
    where
        I: IntoIterator<Item = &'a MasterVersion>,
        M: Matcher + ?Sized,
    {
        let ids: Vec<String> = versions.into_iter().map(|v| v.id.clone()).collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let mut adjacency = vec![Vec::new(); ids.len()];

        for update in updates {
            let Some(&to) = index.get(&update.to) else {
                warn!(from = %update.from, to = %update.to, "dropping update edge with unknown target version");
                continue;
            };
            let mut resolved_any = false;
            for (from, id) in ids.iter().enumerate() {
                match matcher.matches(&update.from, id) {
                    Ok(true) => {
                        adjacency[from].push(Edge {
                            to,
                            update: update.clone(),
                        });
                        resolved_any = true;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(from = %update.from, version = %id, error = %e, "skipping version while resolving update edge");
                    }
                }
            }
            if !resolved_any {
                warn!(from = %update.from, to = %update.to, "dropping update edge with unresolvable source version");
            }
        }

        UpdatePathSearch {
            ids,
            index,
            adjacency,
        }
    }

    /// Finds the fewest-hop update sequence between two versions.
    ///
    /// The returned steps carry literal version ids in `from`/`to`,
    /// never range expressions, so they can be applied directly.
    pub fn search(&self, from: &str, to: &str) -> Result<Vec<MasterUpdate>, VersionError> {
        let &start = self
            .index
            .get(from)
            .ok_or_else(|| VersionError::UnknownVersion(from.to_string()))?;
        let &goal = self
            .index
            .get(to)
            .ok_or_else(|| VersionError::UnknownVersion(to.to_string()))?;

        // Dijkstra with uniform weight 1. Duplicate edges between the
        // same pair of versions are harmless, the first settled
        // distance wins.
        let mut dist = vec![u32::MAX; self.ids.len()];
        let mut prev: Vec<Option<usize>> = vec![None; self.ids.len()];
        let mut heap = BinaryHeap::new();
        dist[start] = 0;
        heap.push(Reverse((0u32, start)));

        while let Some(Reverse((d, node))) = heap.pop() {
            if node == goal {
                break;
            }
            if d > dist[node] {
                continue;
            }
            for edge in &self.adjacency[node] {
                let next = d + 1;
                if next < dist[edge.to] {
                    dist[edge.to] = next;
                    prev[edge.to] = Some(node);
                    heap.push(Reverse((next, edge.to)));
                }
            }
        }

        if dist[goal] == u32::MAX {
            return Err(VersionError::NoPath {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        // Walk predecessors back to the start, then resolve each hop
        // into a concrete update step.
        let mut nodes = vec![goal];
        let mut cursor = goal;
        while let Some(p) = prev[cursor] {
            nodes.push(p);
            cursor = p;
        }
        nodes.reverse();

        let mut steps = Vec::with_capacity(nodes.len().saturating_sub(1));
        for pair in nodes.windows(2) {
            let (u, v) = (pair[0], pair[1]);
            let edge = self.adjacency[u]
                .iter()
                .find(|e| e.to == v)
                .ok_or_else(|| VersionError::NoPath {
                    from: from.to_string(),
                    to: to.to_string(),
                })?;
            steps.push(MasterUpdate {
                from: self.ids[u].clone(),
                to: self.ids[v].clone(),
                ..edge.update.clone()
            });
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{EqualityMatcher, SemverMatcher};

    fn catalogue(ids: &[&str]) -> Vec<MasterVersion> {
        ids.iter()
            .map(|id| MasterVersion {
                id: (*id).to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn path_versions(steps: &[MasterUpdate], from: &str) -> Vec<String> {
        let mut out = vec![from.to_string()];
        out.extend(steps.iter().map(|s| s.to.clone()));
        out
    }

    #[test]
    fn equality_search_walks_every_hop() {
        let versions = catalogue(&["1.5.1", "1.5.2", "1.5.3", "1.5.4"]);
        let updates = vec![
            MasterUpdate::new("1.5.1", "1.5.2"),
            MasterUpdate::new("1.5.2", "1.5.3"),
            // Duplicate edge, deliberately.
            MasterUpdate::new("1.5.2", "1.5.3"),
            MasterUpdate::new("1.5.3", "1.5.4"),
        ];

        let search = UpdatePathSearch::new(&versions, &updates, &EqualityMatcher);
        let steps = search.search("1.5.2", "1.5.4").unwrap();
        assert_eq!(
            path_versions(&steps, "1.5.2"),
            vec!["1.5.2", "1.5.3", "1.5.4"]
        );
    }

    #[test]
    fn wildcard_edge_shortens_the_path() {
        let versions = catalogue(&["1.5.1", "1.5.2", "1.5.3", "1.5.4"]);
        let updates = vec![
            MasterUpdate::new("1.5.1", "1.5.2"),
            MasterUpdate::new("1.5.2", "1.5.3"),
            MasterUpdate::new("1.5.2", "1.5.3"),
            MasterUpdate::new("1.5.3", "1.5.4"),
            MasterUpdate::new("~1.5.x", "1.5.4"),
        ];

        let search = UpdatePathSearch::new(&versions, &updates, &SemverMatcher);
        let steps = search.search("1.5.2", "1.5.4").unwrap();
        assert_eq!(path_versions(&steps, "1.5.2"), vec!["1.5.2", "1.5.4"]);
        // Steps are fully resolved, never the range expression.
        assert_eq!(steps[0].from, "1.5.2");
        assert_eq!(steps[0].to, "1.5.4");
    }

    #[test]
    fn unparseable_catalogue_id_does_not_drop_other_edges() {
        let versions = catalogue(&["1.5.1", "not-a-version", "1.5.2", "1.5.3"]);
        let updates = vec![
            MasterUpdate::new("1.5.1", "1.5.2"),
            MasterUpdate::new("1.5.*", "1.5.3"),
        ];

        let search = UpdatePathSearch::new(&versions, &updates, &SemverMatcher);
        let steps = search.search("1.5.1", "1.5.3").unwrap();
        assert_eq!(path_versions(&steps, "1.5.1"), vec!["1.5.1", "1.5.3"]);
        let steps = search.search("1.5.2", "1.5.3").unwrap();
        assert_eq!(path_versions(&steps, "1.5.2"), vec!["1.5.2", "1.5.3"]);
    }

    #[test]
    fn unknown_endpoints_are_not_found() {
        let versions = catalogue(&["1.5.1", "1.5.2"]);
        let updates = vec![MasterUpdate::new("1.5.1", "1.5.2")];
        let search = UpdatePathSearch::new(&versions, &updates, &EqualityMatcher);

        assert!(matches!(
            search.search("0.9.0", "1.5.2"),
            Err(VersionError::UnknownVersion(_))
        ));
        assert!(matches!(
            search.search("1.5.1", "9.9.9"),
            Err(VersionError::UnknownVersion(_))
        ));
    }

    #[test]
    fn unreachable_target_is_no_path() {
        let versions = catalogue(&["1.5.1", "1.5.2", "1.6.0"]);
        let updates = vec![MasterUpdate::new("1.5.1", "1.5.2")];
        let search = UpdatePathSearch::new(&versions, &updates, &EqualityMatcher);

        assert!(matches!(
            search.search("1.5.1", "1.6.0"),
            Err(VersionError::NoPath { .. })
        ));
    }

    #[test]
    fn bad_edges_are_dropped_without_breaking_valid_searches() {
        let versions = catalogue(&["1.5.1", "1.5.2"]);
        let updates = vec![
            MasterUpdate::new("1.5.1", "1.5.2"),
            // Unknown target and unknown source: both dropped.
            MasterUpdate::new("1.5.2", "7.7.7"),
            MasterUpdate::new("7.7.7", "1.5.2"),
        ];
        let search = UpdatePathSearch::new(&versions, &updates, &EqualityMatcher);

        let steps = search.search("1.5.1", "1.5.2").unwrap();
        assert_eq!(steps.len(), 1);
    }
}
