//! Group hierarchy as an arena of nodes
//!
//! Groups form a forest. Each node stores its parent id and a cached fully
//! qualified name (FQN): the parent's FQN, a `.`, then the group's own name.
//! Roots carry just their name.
//!
//! [`GroupTree::rename`] and [`GroupTree::move_to`] recompute the FQN of the
//! whole affected subtree and return every `(id, new fqn)` pair so the
//! caller can persist them together.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub const PATH_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupTreeError {
    #[error("group {0} not found")]
    UnknownGroup(i64),

    #[error("group {0} already exists")]
    DuplicateId(i64),

    #[error("parent {parent} of group {id} not found")]
    UnknownParent { id: i64, parent: i64 },

    #[error("moving group {id} under {parent} would create a cycle")]
    Cycle { id: i64, parent: i64 },

    #[error("invalid group name '{0}'")]
    InvalidName(String),

    #[error("group {0} still has child groups")]
    HasChildren(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupNode {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub fully_qualified_name: String,
    children: BTreeSet<i64>,
}

impl GroupNode {
    pub fn children(&self) -> impl Iterator<Item = i64> + '_ {
        self.children.iter().copied()
    }
}

/// A name is one path segment: non-empty, no separator
pub fn validate_name(name: &str) -> Result<(), GroupTreeError> {
    if name.trim().is_empty() || name.contains(PATH_SEPARATOR) {
        return Err(GroupTreeError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn join(parent_fqn: Option<&str>, name: &str) -> String {
    match parent_fqn {
        Some(parent) => format!("{}{}{}", parent, PATH_SEPARATOR, name),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupTree {
    nodes: BTreeMap<i64, GroupNode>,
}

impl GroupTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(id, name, parent_id)` rows in any order
    pub fn from_rows<I>(rows: I) -> Result<Self, GroupTreeError>
    where
        I: IntoIterator<Item = (i64, String, Option<i64>)>,
    {
        let mut pending: BTreeMap<i64, (String, Option<i64>)> = BTreeMap::new();
        for (id, name, parent) in rows {
            if pending.insert(id, (name, parent)).is_some() {
                return Err(GroupTreeError::DuplicateId(id));
            }
        }

        let mut tree = Self::new();
        // Insert parents before children; a pass that inserts nothing means
        // the remaining rows reference missing parents or each other
        while !pending.is_empty() {
            let ready: Vec<i64> = pending
                .iter()
                .filter(|(_, (_, parent))| parent.map_or(true, |p| tree.contains(p)))
                .map(|(id, _)| *id)
                .collect();

            if ready.is_empty() {
                let (&id, (_, parent)) = pending.iter().next().ok_or(GroupTreeError::UnknownGroup(0))?;
                let parent = parent.unwrap_or_default();
                return Err(if pending.contains_key(&parent) {
                    GroupTreeError::Cycle { id, parent }
                } else {
                    GroupTreeError::UnknownParent { id, parent }
                });
            }

            for id in ready {
                if let Some((name, parent)) = pending.remove(&id) {
                    tree.insert(id, name, parent)?;
                }
            }
        }
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&GroupNode> {
        self.nodes.get(&id)
    }

    fn node(&self, id: i64) -> Result<&GroupNode, GroupTreeError> {
        self.nodes.get(&id).ok_or(GroupTreeError::UnknownGroup(id))
    }

    pub fn path_of(&self, id: i64) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.fully_qualified_name.as_str())
    }

    pub fn find_by_path(&self, fqn: &str) -> Option<&GroupNode> {
        self.nodes.values().find(|n| n.fully_qualified_name == fqn)
    }

    pub fn roots(&self) -> impl Iterator<Item = &GroupNode> {
        self.nodes.values().filter(|n| n.parent_id.is_none())
    }

    /// FQN a new child `name` of `parent` would get
    pub fn path_for(&self, name: &str, parent: Option<i64>) -> Result<String, GroupTreeError> {
        validate_name(name)?;
        let parent_fqn = match parent {
            Some(p) => Some(self.node(p)?.fully_qualified_name.as_str()),
            None => None,
        };
        Ok(join(parent_fqn, name))
    }

    /// Add a node; returns its FQN
    pub fn insert(
        &mut self,
        id: i64,
        name: String,
        parent_id: Option<i64>,
    ) -> Result<String, GroupTreeError> {
        if self.contains(id) {
            return Err(GroupTreeError::DuplicateId(id));
        }
        let fqn = match parent_id {
            Some(parent) if !self.contains(parent) => {
                return Err(GroupTreeError::UnknownParent { id, parent })
            }
            _ => self.path_for(&name, parent_id)?,
        };

        if let Some(parent) = parent_id.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.insert(id);
        }
        self.nodes.insert(
            id,
            GroupNode {
                id,
                name,
                parent_id,
                fully_qualified_name: fqn.clone(),
                children: BTreeSet::new(),
            },
        );
        Ok(fqn)
    }

    /// Direct children, ordered by id
    pub fn children_of(&self, id: i64) -> Vec<i64> {
        self.nodes
            .get(&id)
            .map(|n| n.children().collect())
            .unwrap_or_default()
    }

    /// Every node below `id`, parents before children
    pub fn descendants(&self, id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut stack: Vec<i64> = self.children_of(id).into_iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children_of(next).into_iter().rev());
        }
        out
    }

    /// `id` itself and everything below it
    pub fn subtree(&self, id: i64) -> Vec<i64> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut out = vec![id];
        out.extend(self.descendants(id));
        out
    }

    /// True when `id` equals `ancestor` or lies below it
    pub fn is_within(&self, ancestor: i64, id: i64) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.nodes.get(&c).and_then(|n| n.parent_id);
        }
        false
    }

    /// Union of the subtrees rooted at `roots`, ordered by id
    pub fn covering(&self, roots: &[i64]) -> Vec<i64> {
        let mut ids = BTreeSet::new();
        for &root in roots {
            ids.extend(self.subtree(root));
        }
        ids.into_iter().collect()
    }

    /// Rename `id`; returns the new FQN of it and every descendant
    pub fn rename(&mut self, id: i64, name: &str) -> Result<Vec<(i64, String)>, GroupTreeError> {
        validate_name(name)?;
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(GroupTreeError::UnknownGroup(id))?;
        node.name = name.to_string();
        Ok(self.recompute(id))
    }

    /// Reparent `id`; returns the new FQN of it and every descendant
    pub fn move_to(
        &mut self,
        id: i64,
        new_parent: Option<i64>,
    ) -> Result<Vec<(i64, String)>, GroupTreeError> {
        let old_parent = self.node(id)?.parent_id;
        if let Some(parent) = new_parent {
            if !self.contains(parent) {
                return Err(GroupTreeError::UnknownParent { id, parent });
            }
            if self.is_within(id, parent) {
                return Err(GroupTreeError::Cycle { id, parent });
            }
        }
        if old_parent == new_parent {
            return Ok(Vec::new());
        }

        if let Some(old) = old_parent.and_then(|p| self.nodes.get_mut(&p)) {
            old.children.remove(&id);
        }
        if let Some(new) = new_parent.and_then(|p| self.nodes.get_mut(&p)) {
            new.children.insert(id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = new_parent;
        }
        Ok(self.recompute(id))
    }

    /// Remove a leaf
    pub fn remove(&mut self, id: i64) -> Result<GroupNode, GroupTreeError> {
        if !self.node(id)?.children.is_empty() {
            return Err(GroupTreeError::HasChildren(id));
        }
        let node = self.nodes.remove(&id).ok_or(GroupTreeError::UnknownGroup(id))?;
        if let Some(parent) = node.parent_id.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.remove(&id);
        }
        Ok(node)
    }

    fn recompute(&mut self, id: i64) -> Vec<(i64, String)> {
        let mut changed = Vec::new();
        for node_id in self.subtree(id) {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            let parent_fqn = node
                .parent_id
                .and_then(|p| self.nodes.get(&p))
                .map(|p| p.fully_qualified_name.clone());
            let fqn = join(parent_fqn.as_deref(), &node.name);
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.fully_qualified_name = fqn.clone();
            }
            changed.push((node_id, fqn));
        }
        changed
    }

    /// Every node's FQN equals its parent's FQN + `.` + its name
    pub fn check_paths(&self) -> bool {
        self.nodes.values().all(|n| {
            let parent_fqn = n.parent_id.and_then(|p| self.path_of(p));
            n.fully_qualified_name == join(parent_fqn, &n.name)
        })
    }
}
