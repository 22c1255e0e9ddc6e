//! The resource graph and its transformation passes.
//!
//! The central structure is [`Graph`]: an ordered mapping from resource
//! identifier to an ordered list of child identifiers. Edges mean
//! *containment* when the parent is a group node (VPC, subnet,
//! availability zone, resource group, …) and *logical dependency*
//! otherwise; the per-provider `group_nodes` table distinguishes the two
//! when it matters.
//!
//! Passes over the graph live in the submodules, in pipeline order:
//!
//! 1. [`builder`]: base graph from the planner's low-level edges
//! 2. [`enrich`]: relations implied by metadata references
//! 3. [`consolidate`]: family-prefix collapsing
//! 4. [`annotations`]: automatic and user-supplied overrides
//! 5. [`variants`]: keyword-driven type swaps
//! 6. [`expand`]: `count`-driven multi-instance cloning
//! 7. [`cleanup`]: edge reversal, cycle breaking, sorting, validation

pub mod annotations;
pub mod builder;
pub mod cleanup;
pub mod consolidate;
pub mod enrich;
pub mod expand;
pub mod export;
pub mod variants;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Directed adjacency map with at most one edge per (parent, child) pair.
///
/// Keys iterate in sorted order (B-tree), which keeps every read of the
/// graph deterministic; adjacency lists keep insertion order until the
/// final cleanup pass sorts them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph(BTreeMap<String, Vec<String>>);

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `node` exists as a key.
    #[must_use]
    pub fn contains(&self, node: &str) -> bool {
        self.0.contains_key(node)
    }

    /// Children of `node`, empty when absent.
    #[must_use]
    pub fn children(&self, node: &str) -> &[String] {
        self.0.get(node).map_or(&[], Vec::as_slice)
    }

    /// Mutable adjacency list, creating the node when absent.
    pub fn children_mut(&mut self, node: &str) -> &mut Vec<String> {
        self.0.entry(node.to_string()).or_default()
    }

    /// Borrow the adjacency list when the node exists.
    #[must_use]
    pub fn get(&self, node: &str) -> Option<&Vec<String>> {
        self.0.get(node)
    }

    /// Ensure `node` exists, with an empty adjacency list if new.
    pub fn add_node(&mut self, node: impl Into<String>) {
        self.0.entry(node.into()).or_default();
    }

    /// Add `parent -> child`, creating `parent` if needed. Idempotent:
    /// a second identical edge is ignored.
    pub fn add_edge(&mut self, parent: &str, child: &str) {
        let list = self.0.entry(parent.to_string()).or_default();
        if !list.iter().any(|c| c == child) {
            list.push(child.to_string());
        }
    }

    /// Remove `parent -> child` when present. Returns whether an edge
    /// was removed.
    pub fn remove_edge(&mut self, parent: &str, child: &str) -> bool {
        if let Some(list) = self.0.get_mut(parent) {
            if let Some(pos) = list.iter().position(|c| c == child) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// True when `parent -> child` exists.
    #[must_use]
    pub fn has_edge(&self, parent: &str, child: &str) -> bool {
        self.children(parent).iter().any(|c| c == child)
    }

    /// Remove a node key, returning its adjacency list. References to the
    /// node from other adjacency lists are left alone; callers that need
    /// a clean removal use [`Graph::remove_node_and_refs`].
    pub fn remove_node(&mut self, node: &str) -> Option<Vec<String>> {
        self.0.remove(node)
    }

    /// Remove a node and every reference to it.
    pub fn remove_node_and_refs(&mut self, node: &str) {
        self.0.remove(node);
        for list in self.0.values_mut() {
            list.retain(|c| c != node);
        }
    }

    /// Insert a node with an explicit adjacency list, replacing any
    /// existing entry.
    pub fn insert(&mut self, node: impl Into<String>, children: Vec<String>) {
        self.0.insert(node.into(), children);
    }

    /// Iterate over `(node, children)` in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Iterate over node identifiers in sorted order.
    pub fn nodes(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Owned snapshot of the node identifiers. Mutating passes iterate
    /// over this instead of the live key set.
    #[must_use]
    pub fn keys_snapshot(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// First node whose identifier contains `keyword`, in sorted order.
    #[must_use]
    pub fn find_containing(&self, keyword: &str) -> Option<&String> {
        self.0.keys().find(|k| k.contains(keyword))
    }

    /// All nodes whose identifier contains `keyword`, in sorted order.
    #[must_use]
    pub fn keys_containing(&self, keyword: &str) -> Vec<String> {
        self.0.keys().filter(|k| k.contains(keyword)).cloned().collect()
    }

    /// Parents holding an exact edge to `target`.
    #[must_use]
    pub fn parents_of(&self, target: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, children)| children.iter().any(|c| c == target))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Parents holding an edge to any node whose module-stripped form
    /// starts with the module-stripped `target` (the `.*`-style match the
    /// handlers rely on).
    #[must_use]
    pub fn parents_of_prefix(&self, target: &str) -> Vec<String> {
        let wanted = ids::strip_module(target.trim_end_matches('*'));
        self.0
            .iter()
            .filter(|(_, children)| {
                children.iter().any(|c| ids::strip_module(c).starts_with(wanted))
            })
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Rename `old` to `new`, carrying the adjacency list over and
    /// rewriting every reference. Fails when `new` already exists as an
    /// unrelated node.
    pub fn rename_node(&mut self, old: &str, new: &str) -> crate::error::Result<()> {
        if old == new {
            return Ok(());
        }
        if self.0.contains_key(new) {
            return Err(crate::error::TerracartaError::RenameCollision {
                original: old.to_string(),
                renamed: new.to_string(),
            });
        }
        if let Some(children) = self.0.remove(old) {
            self.0.insert(new.to_string(), children);
        }
        for list in self.0.values_mut() {
            for child in list.iter_mut() {
                if child == old {
                    *child = new.to_string();
                }
            }
        }
        Ok(())
    }

    /// Sort every adjacency list in place.
    pub fn sort_adjacency(&mut self) {
        for list in self.0.values_mut() {
            list.sort();
            list.dedup();
        }
    }

    /// Drop self-loops everywhere.
    pub fn remove_self_loops(&mut self) {
        for (node, list) in &mut self.0 {
            list.retain(|c| c != node);
        }
    }
}

impl FromIterator<(String, Vec<String>)> for Graph {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Resource identifier helpers.
///
/// Identifiers are dotted `<type>.<name>` strings, optionally prefixed
/// with `module.<mod>.` and optionally suffixed with `~<k>` for numbered
/// clones. Planner `[i]` bracket indices normalize to `~<i+1>`.
pub mod ids {
    /// Strip a leading `module.<mod>.` prefix, keeping the trailing
    /// `<type>.<name>` pair.
    #[must_use]
    pub fn strip_module(node: &str) -> &str {
        if !node.contains("module.") {
            return node;
        }
        let parts: Vec<&str> = node.split('.').collect();
        if parts.len() < 2 {
            return node;
        }
        let start = node.len()
            - parts[parts.len() - 2].len()
            - 1
            - parts[parts.len() - 1].len();
        &node[start..]
    }

    /// Module name from a `module.<mod>.…` address, when present.
    #[must_use]
    pub fn module_of(address: &str) -> Option<&str> {
        let mut parts = address.split('.');
        if parts.next() == Some("module") {
            parts.next()
        } else {
            None
        }
    }

    /// Strip a trailing `~<k>` clone suffix.
    #[must_use]
    pub fn strip_suffix(node: &str) -> &str {
        node.split('~').next().unwrap_or(node)
    }

    /// The numeric clone suffix, when present.
    #[must_use]
    pub fn suffix_of(node: &str) -> Option<u32> {
        node.rsplit_once('~').and_then(|(_, n)| n.parse().ok())
    }

    /// Append a `~<k>` clone suffix.
    #[must_use]
    pub fn with_suffix(node: &str, k: u32) -> String {
        format!("{node}~{k}")
    }

    /// The `<type>` part of a module-stripped identifier.
    #[must_use]
    pub fn type_of(node: &str) -> &str {
        strip_suffix(strip_module(node)).split('.').next().unwrap_or(node)
    }

    /// The `<name>` part of a module-stripped identifier.
    #[must_use]
    pub fn name_of(node: &str) -> &str {
        let stripped = strip_module(node);
        stripped.split('.').nth(1).unwrap_or(stripped)
    }

    /// Normalize planner `name[i]` index notation to 1-based `name~<i+1>`.
    #[must_use]
    pub fn normalize_index(address: &str) -> String {
        let Some(open) = address.find('[') else {
            return address.to_string();
        };
        let Some(close) = address.rfind(']') else {
            return address.to_string();
        };
        let index: i64 = address[open + 1..close]
            .trim_matches('"')
            .parse()
            .unwrap_or(0);
        format!("{}~{}", &address[..open], index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn test_add_edge_is_idempotent() {
        let mut graph = Graph::new();
        graph.add_edge("aws_vpc.main", "aws_subnet.a");
        graph.add_edge("aws_vpc.main", "aws_subnet.a");
        assert_eq!(graph.children("aws_vpc.main"), ["aws_subnet.a"]);
    }

    #[test]
    fn test_rename_rewrites_references() {
        let mut graph = Graph::new();
        graph.add_edge("aws_subnet.a", "aws_lb.web");
        graph.add_node("aws_lb.web");
        graph.rename_node("aws_lb.web", "aws_alb.web").unwrap();
        assert!(graph.contains("aws_alb.web"));
        assert!(!graph.contains("aws_lb.web"));
        assert_eq!(graph.children("aws_subnet.a"), ["aws_alb.web"]);
    }

    #[test]
    fn test_rename_collision_is_an_error() {
        let mut graph = Graph::new();
        graph.add_node("aws_lb.web");
        graph.add_node("aws_alb.web");
        assert!(graph.rename_node("aws_lb.web", "aws_alb.web").is_err());
    }

    #[test]
    fn test_parents_of_prefix_matches_wildcards() {
        let mut graph = Graph::new();
        graph.add_edge("aws_subnet.a", "aws_security_group.web");
        graph.add_edge("aws_vpc.main", "aws_subnet.a");
        let parents = graph.parents_of_prefix("aws_security_group.*");
        assert_eq!(parents, ["aws_subnet.a"]);
    }

    #[test_case("module.networking.aws_vpc.main", "aws_vpc.main"; "module scoped")]
    #[test_case("aws_vpc.main", "aws_vpc.main"; "plain")]
    #[test_case("module.a.module.b.aws_vpc.main", "aws_vpc.main"; "nested modules")]
    fn test_strip_module(input: &str, expected: &str) {
        assert_eq!(ids::strip_module(input), expected);
    }

    #[test_case("aws_subnet.public[0]", "aws_subnet.public~1"; "index zero")]
    #[test_case("aws_subnet.public[2]", "aws_subnet.public~3"; "index two")]
    #[test_case("aws_subnet.public", "aws_subnet.public"; "no index")]
    fn test_normalize_index(input: &str, expected: &str) {
        assert_eq!(ids::normalize_index(input), expected);
    }

    #[test]
    fn test_id_parts() {
        assert_eq!(ids::type_of("aws_subnet.public~2"), "aws_subnet");
        assert_eq!(ids::name_of("module.net.aws_subnet.public"), "public");
        assert_eq!(ids::suffix_of("aws_subnet.public~2"), Some(2));
        assert_eq!(ids::suffix_of("aws_subnet.public"), None);
        assert_eq!(ids::strip_suffix("aws_subnet.public~2"), "aws_subnet.public");
    }
}
