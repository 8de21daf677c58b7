/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use dashmap::DashMap;
use dupe::Dupe;
use quarry_common::file_ops::FileValue;

use crate::artifact::Artifact;
use crate::tree_value::TreeValue;

/// Per-action cache of output metadata. Both maps are written concurrently
/// from tree walks and post-spawn verification; single-writer-per-key during
/// execution is the callers' invariant, not enforced here.
#[derive(Default)]
pub struct OutputStore {
    artifact_data: DashMap<Artifact, FileValue>,
    tree_data: DashMap<Artifact, TreeValue>,
}

impl OutputStore {
    pub fn new() -> OutputStore {
        OutputStore::default()
    }

    pub fn get_artifact_data(&self, artifact: &Artifact) -> Option<FileValue> {
        self.artifact_data.get(artifact).map(|v| v.clone())
    }

    pub fn put_artifact_data(&self, artifact: Artifact, value: FileValue) {
        self.artifact_data.insert(artifact, value);
    }

    /// Atomic get-or-insert; returns the winning value.
    pub fn or_insert_artifact_data(&self, artifact: &Artifact, value: FileValue) -> FileValue {
        self.artifact_data
            .entry(artifact.dupe())
            .or_insert(value)
            .clone()
    }

    pub fn get_tree_data(&self, artifact: &Artifact) -> Option<TreeValue> {
        self.tree_data.get(artifact).map(|v| v.dupe())
    }

    pub fn put_tree_data(&self, artifact: Artifact, value: TreeValue) {
        self.tree_data.insert(artifact, value);
    }

    /// Removes an artifact from both maps.
    pub fn remove(&self, artifact: &Artifact) {
        self.artifact_data.remove(artifact);
        self.tree_data.remove(artifact);
    }

    /// Empties both maps. Done exactly once, at the cache-check to execution
    /// transition.
    pub fn clear(&self) {
        self.artifact_data.clear();
        self.tree_data.clear();
    }

    /// Snapshot for promotion into the action's execution value.
    pub fn all_artifact_data(&self) -> Vec<(Artifact, FileValue)> {
        self.artifact_data
            .iter()
            .map(|entry| (entry.key().dupe(), entry.value().clone()))
            .collect()
    }

    pub fn all_tree_data(&self) -> Vec<(Artifact, TreeValue)> {
        self.tree_data
            .iter()
            .map(|entry| (entry.key().dupe(), entry.value().dupe()))
            .collect()
    }

    pub fn artifact_data_len(&self) -> usize {
        self.artifact_data.len()
    }

    pub fn tree_data_len(&self) -> usize {
        self.tree_data.len()
    }
}

#[cfg(test)]
mod tests {
    use quarry_core::fs::paths::ForwardRelativePathBuf;

    use super::*;

    fn artifact(s: &str) -> Artifact {
        Artifact::file(
            ForwardRelativePathBuf::unchecked_new("out".to_owned()),
            ForwardRelativePathBuf::unchecked_new(s.to_owned()),
        )
    }

    #[test]
    fn remove_touches_both_maps() {
        let store = OutputStore::new();
        let a = artifact("a");
        let tree = Artifact::tree(
            ForwardRelativePathBuf::unchecked_new("out".to_owned()),
            ForwardRelativePathBuf::unchecked_new("a".to_owned()),
        );

        store.put_artifact_data(a.dupe(), FileValue::Omitted);
        store.put_tree_data(tree.dupe(), TreeValue::Omitted);

        store.remove(&a);
        assert_eq!(None, store.get_artifact_data(&a));
        // `a` and the tree share an exec path but not an identity.
        assert_eq!(Some(TreeValue::Omitted), store.get_tree_data(&tree));

        store.remove(&tree);
        assert_eq!(None, store.get_tree_data(&tree));
    }

    #[test]
    fn or_insert_returns_the_winner() {
        let store = OutputStore::new();
        let a = artifact("m");

        let first = store.or_insert_artifact_data(&a, FileValue::Middleman);
        assert_eq!(FileValue::Middleman, first);

        let second = store.or_insert_artifact_data(&a, FileValue::Omitted);
        assert_eq!(FileValue::Middleman, second);
        assert_eq!(1, store.artifact_data_len());
    }

    #[test]
    fn clear_empties_everything() {
        let store = OutputStore::new();
        store.put_artifact_data(artifact("a"), FileValue::Middleman);
        store.clear();
        assert_eq!(0, store.artifact_data_len());
        assert_eq!(0, store.tree_data_len());
    }
}
