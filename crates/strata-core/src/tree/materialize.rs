//! Nested tree structures from flat parent links

use std::collections::HashSet;

use serde::Serialize;

use crate::model::EntityIdentity;

/// Flat parent pointer of one tree row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub child: EntityIdentity,
    pub parent: Option<EntityIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub identity: EntityIdentity,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Identities in pre-order
    pub fn identities(&self) -> Vec<&EntityIdentity> {
        let mut out = vec![&self.identity];
        for child in &self.children {
            out.extend(child.identities());
        }
        out
    }
}

/// Build the subtree rooted at `root` from flat parent links
///
/// Children keep the order of `links`. A child is attached at most once per
/// parent, and an identity already on the current path is never descended
/// into again, so corrupt cyclic links still terminate.
pub fn build_descendants_tree(root: &EntityIdentity, links: &[ParentLink]) -> TreeNode {
    let mut path = HashSet::new();
    attach(root, links, &mut path)
}

fn attach<'a>(
    identity: &'a EntityIdentity,
    links: &'a [ParentLink],
    path: &mut HashSet<&'a EntityIdentity>,
) -> TreeNode {
    path.insert(identity);
    let mut attached: HashSet<&EntityIdentity> = HashSet::new();
    let mut children = Vec::new();
    for link in links {
        if link.parent.as_ref() != Some(identity) || path.contains(&link.child) {
            continue;
        }
        if attached.insert(&link.child) {
            children.push(attach(&link.child, links, path));
        }
    }
    path.remove(identity);
    TreeNode {
        identity: identity.clone(),
        children,
    }
}

/// Identities from `leaf` up to its root
///
/// Stops at the first identity without a known parent or at a repeat.
pub fn build_ancestor_chain(leaf: &EntityIdentity, links: &[ParentLink]) -> Vec<EntityIdentity> {
    let mut chain = vec![leaf.clone()];
    let mut seen: HashSet<EntityIdentity> = HashSet::from([leaf.clone()]);
    let mut current = leaf.clone();

    while let Some(parent) = links
        .iter()
        .find(|link| link.child == current)
        .and_then(|link| link.parent.clone())
    {
        if !seen.insert(parent.clone()) {
            break;
        }
        chain.push(parent.clone());
        current = parent;
    }

    chain
}
