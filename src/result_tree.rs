//! Path-addressed result tree
//!
//! `"assets.total_assets"` addresses the leaf `total_assets` inside the
//! branch `assets`. Branches are created on first insert. A tree is owned by
//! exactly one replica run.

use crate::error::AuditError;
use crate::models::OperationKind;
use crate::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source tag for values produced by the arithmetic engine
pub const ENGINE_SOURCE: &str = "calculation_tool";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeafStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Leaf {
    /// Figure as the statement reports it (or the engine total when there is none)
    pub recorded: Option<Decimal>,
    pub computed: Option<Decimal>,
    pub difference: Option<Decimal>,
    /// Outcome of balance/footing checks
    pub check: Option<bool>,
    pub status: LeafStatus,
    pub source: String,
    pub operation: OperationKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

impl Leaf {
    pub fn is_error(&self) -> bool {
        self.status == LeafStatus::Error
    }

    /// Textual fields subject to phrase screening. Numbers are never scanned.
    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.source.as_str()),
            Some(self.description.as_str()),
            self.error.as_deref(),
            self.annotation.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Node {
    Leaf(Leaf),
    Branch(BTreeMap<String, Node>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ResultTree {
    root: BTreeMap<String, Node>,
}

impl ResultTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a leaf at a dot-separated path, creating branches as needed.
    ///
    /// An existing leaf at the same path is replaced. Passing through a
    /// leaf, or landing on a branch, is a conflict.
    pub fn insert(&mut self, path: &str, leaf: Leaf) -> Result<()> {
        let segments = split_path(path)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| AuditError::PathConflict(path.to_string()))?;

        let mut current = &mut self.root;
        for segment in parents {
            let node = current
                .entry(segment.to_string())
                .or_insert_with(|| Node::Branch(BTreeMap::new()));

            current = match node {
                Node::Branch(children) => children,
                Node::Leaf(_) => {
                    return Err(AuditError::PathConflict(format!(
                        "{} passes through leaf '{}'",
                        path, segment
                    )))
                }
            };
        }

        if let Some(Node::Branch(_)) = current.get(*last) {
            return Err(AuditError::PathConflict(format!(
                "{} is a branch",
                path
            )));
        }

        current.insert(last.to_string(), Node::Leaf(leaf));
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&Leaf> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut current = &self.root;
        for segment in parents {
            match current.get(*segment)? {
                Node::Branch(children) => current = children,
                Node::Leaf(_) => return None,
            }
        }

        match current.get(*last)? {
            Node::Leaf(leaf) => Some(leaf),
            Node::Branch(_) => None,
        }
    }

    /// Attach contextual text to an existing leaf. Numeric fields are untouched.
    pub fn annotate(&mut self, path: &str, text: &str) -> Result<()> {
        let leaf = self
            .get_mut(path)
            .ok_or_else(|| AuditError::UnknownPath(path.to_string()))?;
        leaf.annotation = Some(text.to_string());
        Ok(())
    }

    /// All leaves with their full paths, in path order
    pub fn leaves(&self) -> Vec<(String, &Leaf)> {
        let mut out = Vec::new();
        collect_leaves(&self.root, "", &mut out);
        out
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn get_mut(&mut self, path: &str) -> Option<&mut Leaf> {
        let segments = split_path(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.root;
        for segment in parents {
            match current.get_mut(*segment)? {
                Node::Branch(children) => current = children,
                Node::Leaf(_) => return None,
            }
        }

        match current.get_mut(*last)? {
            Node::Leaf(leaf) => Some(leaf),
            Node::Branch(_) => None,
        }
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.trim().is_empty()) {
        return Err(AuditError::PathConflict(format!(
            "malformed path '{}'",
            path
        )));
    }
    Ok(segments)
}

fn collect_leaves<'a>(
    nodes: &'a BTreeMap<String, Node>,
    prefix: &str,
    out: &mut Vec<(String, &'a Leaf)>,
) {
    for (key, node) in nodes {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match node {
            Node::Leaf(leaf) => out.push((path, leaf)),
            Node::Branch(children) => collect_leaves(children, &path, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(value: i64) -> Leaf {
        Leaf {
            recorded: Some(Decimal::from(value)),
            computed: Some(Decimal::from(value)),
            difference: Some(Decimal::ZERO),
            check: None,
            status: LeafStatus::Ok,
            source: ENGINE_SOURCE.to_string(),
            operation: OperationKind::Sum,
            description: "test".to_string(),
            error: None,
            annotation: None,
        }
    }

    #[test]
    fn test_insert_creates_branches() {
        let mut tree = ResultTree::new();
        tree.insert("assets.current_assets", leaf(10)).unwrap();
        tree.insert("assets.total_assets", leaf(20)).unwrap();
        tree.insert("balancing", leaf(30)).unwrap();

        assert_eq!(
            tree.get("assets.total_assets").unwrap().recorded,
            Some(Decimal::from(20))
        );
        let paths: Vec<String> = tree.leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec!["assets.current_assets", "assets.total_assets", "balancing"]
        );
    }

    #[test]
    fn test_insert_conflicts() {
        let mut tree = ResultTree::new();
        tree.insert("balancing", leaf(1)).unwrap();

        assert!(tree.insert("balancing.status", leaf(2)).is_err());
        tree.insert("assets.total", leaf(3)).unwrap();
        assert!(tree.insert("assets", leaf(4)).is_err());
        assert!(tree.insert("assets..total", leaf(5)).is_err());

        // Same path replaces the leaf
        tree.insert("balancing", leaf(6)).unwrap();
        assert_eq!(tree.get("balancing").unwrap().recorded, Some(Decimal::from(6)));
    }

    #[test]
    fn test_annotate_keeps_numbers() {
        let mut tree = ResultTree::new();
        tree.insert("income.net_income", leaf(500)).unwrap();
        tree.annotate("income.net_income", "Profit for the year").unwrap();

        let annotated = tree.get("income.net_income").unwrap();
        assert_eq!(annotated.annotation.as_deref(), Some("Profit for the year"));
        assert_eq!(annotated.computed, Some(Decimal::from(500)));

        assert!(tree.annotate("income.missing", "x").is_err());
    }

    #[test]
    fn test_serializes_as_nested_object() {
        let mut tree = ResultTree::new();
        tree.insert("assets.total_assets", leaf(20)).unwrap();

        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value["assets"]["total_assets"]["status"], "ok");
        assert_eq!(value["assets"]["total_assets"]["recorded"], "20");

        let back: ResultTree = serde_json::from_value(value).unwrap();
        assert_eq!(back, tree);
    }
}
