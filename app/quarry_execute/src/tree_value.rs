/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::BTreeMap;
use std::sync::Arc;

use dupe::Dupe;
use quarry_common::file_ops::FileValue;
use quarry_common::file_ops::SHA1_SIZE;
use quarry_core::fs::paths::ForwardRelativePath;
use quarry_core::fs::paths::ForwardRelativePathBuf;
use sha1::Digest;
use sha1::Sha1;

use crate::artifact::Artifact;
use crate::artifact::ArtifactKind;

/// Aggregate metadata for a tree artifact.
///
/// Children are keyed by parent-relative path and hold files only;
/// directories are flattened away and exist solely through their file
/// descendants' paths.
#[derive(Debug, Clone, Dupe, PartialEq, Eq)]
pub enum TreeValue {
    /// Declared but not present on the filesystem.
    Missing,
    /// Declared but deliberately not produced by the action.
    Omitted,
    Tree(Arc<TreeData>),
}

#[derive(Debug, PartialEq, Eq)]
pub struct TreeData {
    parent: Artifact,
    children: BTreeMap<ForwardRelativePathBuf, FileValue>,
    archived_representation: Option<(Artifact, FileValue)>,
    materialization_exec_path: Option<ForwardRelativePathBuf>,
    digest: [u8; SHA1_SIZE],
}

impl TreeValue {
    pub fn exists(&self) -> bool {
        matches!(self, TreeValue::Tree(..))
    }

    /// The value representing this tree as a whole: a digest over children in
    /// canonical order, plus the archived representation and materialization
    /// path when present.
    pub fn metadata(&self) -> FileValue {
        match self {
            TreeValue::Missing => FileValue::Missing,
            TreeValue::Omitted => FileValue::Omitted,
            TreeValue::Tree(data) => FileValue::Proxy {
                digest: data.digest.to_vec(),
            },
        }
    }

    /// The tree-child artifacts of this tree. Empty for the sentinels.
    pub fn children(&self) -> Vec<Artifact> {
        match self {
            TreeValue::Tree(data) => data
                .children
                .keys()
                .map(|rel| Artifact::tree_child(&data.parent, rel))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn child_value(&self, parent_relative: &ForwardRelativePath) -> Option<&FileValue> {
        match self {
            TreeValue::Tree(data) => data.children.get(parent_relative),
            _ => None,
        }
    }

    pub fn child_values(
        &self,
    ) -> impl Iterator<Item = (&ForwardRelativePath, &FileValue)> + '_ {
        let children = match self {
            TreeValue::Tree(data) => Some(&data.children),
            _ => None,
        };
        children
            .into_iter()
            .flat_map(|c| c.iter().map(|(k, v)| (&**k, v)))
    }

    pub fn archived_representation(&self) -> Option<&(Artifact, FileValue)> {
        match self {
            TreeValue::Tree(data) => data.archived_representation.as_ref(),
            _ => None,
        }
    }

    pub fn has_archived_representation(&self) -> bool {
        self.archived_representation().is_some()
    }

    pub fn materialization_exec_path(&self) -> Option<&ForwardRelativePath> {
        match self {
            TreeValue::Tree(data) => data.materialization_exec_path.as_deref(),
            _ => None,
        }
    }
}

/// Accumulates children during a tree walk. Walk callbacks run concurrently,
/// so callers guard the builder with a mutex; the walk itself does not
/// guarantee any ordering, the digest canonicalizes it.
pub struct TreeValueBuilder {
    parent: Artifact,
    children: BTreeMap<ForwardRelativePathBuf, FileValue>,
    archived_representation: Option<(Artifact, FileValue)>,
    materialization_exec_path: Option<ForwardRelativePathBuf>,
}

impl TreeValueBuilder {
    pub fn new(parent: Artifact) -> TreeValueBuilder {
        assert!(
            parent.is_tree_artifact(),
            "{} is not a tree artifact",
            parent
        );
        TreeValueBuilder {
            parent,
            children: BTreeMap::new(),
            archived_representation: None,
            materialization_exec_path: None,
        }
    }

    pub fn put_child(&mut self, child: &Artifact, value: FileValue) {
        match child.kind() {
            ArtifactKind::TreeChild {
                parent,
                parent_relative,
            } if parent == &self.parent => {
                self.children.insert(parent_relative.clone(), value);
            }
            _ => panic!("{} is not a child of {}", child, self.parent),
        }
    }

    pub fn set_archived_representation(&mut self, artifact: Artifact, value: FileValue) {
        self.archived_representation = Some((artifact, value));
    }

    pub fn set_materialization_exec_path(&mut self, path: ForwardRelativePathBuf) {
        self.materialization_exec_path = Some(path);
    }

    pub fn build(self) -> TreeValue {
        let digest = compute_digest(
            &self.children,
            self.archived_representation.as_ref().map(|(_, v)| v),
            self.materialization_exec_path.as_deref(),
        );
        TreeValue::Tree(Arc::new(TreeData {
            parent: self.parent,
            children: self.children,
            archived_representation: self.archived_representation,
            materialization_exec_path: self.materialization_exec_path,
            digest,
        }))
    }
}

fn hash_value(h: &mut Sha1, value: &FileValue) {
    match value.digest() {
        Some(digest) => h.update(digest),
        // Children normally carry digests; directories and digest-less
        // values fall back to whatever identity they have.
        None => match value {
            FileValue::Directory { mtime } => h.update(mtime.to_be_bytes()),
            other => h.update(other.size().to_be_bytes()),
        },
    }
}

fn compute_digest(
    children: &BTreeMap<ForwardRelativePathBuf, FileValue>,
    archived: Option<&FileValue>,
    materialization_exec_path: Option<&ForwardRelativePath>,
) -> [u8; SHA1_SIZE] {
    let mut h = Sha1::new();
    for (rel, value) in children {
        h.update(rel.as_str().as_bytes());
        h.update([0]);
        hash_value(&mut h, value);
    }
    if let Some(value) = archived {
        h.update(b"archived");
        hash_value(&mut h, value);
    }
    if let Some(path) = materialization_exec_path {
        h.update(b"materialized");
        h.update(path.as_str().as_bytes());
    }
    h.finalize().into()
}

#[cfg(test)]
mod tests {
    use quarry_common::file_ops::FileDigest;

    use super::*;

    fn rel(s: &str) -> ForwardRelativePathBuf {
        ForwardRelativePathBuf::unchecked_new(s.to_owned())
    }

    fn file_value(contents: &[u8]) -> FileValue {
        FileValue::RegularFile {
            digest: Some(FileDigest::from_bytes(contents)),
            proxy: None,
            size: contents.len() as u64,
            remote: false,
            materialization_exec_path: None,
        }
    }

    fn tree_of(children: &[(&str, &[u8])]) -> TreeValue {
        let parent = Artifact::tree(rel("out"), rel("dir"));
        let mut builder = TreeValueBuilder::new(parent.dupe());
        for (path, contents) in children {
            let child = Artifact::tree_child(&parent, ForwardRelativePath::unchecked_new(path));
            builder.put_child(&child, file_value(contents));
        }
        builder.build()
    }

    #[test]
    fn digest_is_insertion_order_independent() {
        let t1 = tree_of(&[("a", b"1"), ("b", b"2")]);
        let t2 = tree_of(&[("b", b"2"), ("a", b"1")]);
        assert_eq!(t1.metadata(), t2.metadata());
    }

    #[test]
    fn digest_distinguishes_path_and_content() {
        let t1 = tree_of(&[("a", b"1")]);
        let t2 = tree_of(&[("b", b"1")]);
        let t3 = tree_of(&[("a", b"2")]);
        assert_ne!(t1.metadata(), t2.metadata());
        assert_ne!(t1.metadata(), t3.metadata());
    }

    #[test]
    fn children_are_tree_child_artifacts() {
        let tree = tree_of(&[("x/1", b"1"), ("y", b"2")]);
        let children = tree.children();
        assert_eq!(2, children.len());
        assert!(children.iter().all(|c| c.is_tree_child()));
        assert_eq!("out/dir/x/1", children[0].exec_path().as_str());
    }

    #[test]
    fn sentinels_have_no_children() {
        assert!(TreeValue::Missing.children().is_empty());
        assert!(!TreeValue::Omitted.exists());
        assert_eq!(FileValue::Omitted, TreeValue::Omitted.metadata());
    }
}
