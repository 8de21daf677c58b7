/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dupe::Dupe;
use quarry_core::fs::paths::AbsNormPathBuf;
use quarry_core::fs::paths::ForwardRelativePath;
use quarry_core::fs::paths::ForwardRelativePathBuf;

/// Directory inside an output root reserved for single-file archives of tree
/// artifacts.
const ARCHIVED_TREE_DIR: &str = ".archived";

/// The shape of an artifact. Shapes have divergent identity, existence and
/// composition rules, so every consumer matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// A plain output file.
    File,
    /// An output declared to be a symlink, left unresolved.
    UnresolvedSymlink,
    /// A declared output directory whose file list is discovered after
    /// execution.
    Tree,
    /// A named file beneath a tree artifact.
    TreeChild {
        parent: Artifact,
        parent_relative: ForwardRelativePathBuf,
    },
    /// An opaque marker aggregating a bundle of inputs under one identity.
    Middleman,
    /// A plain file whose timestamps are intentionally ignored.
    ConstantMetadata,
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct ArtifactData {
    root: ForwardRelativePathBuf,
    root_relative: ForwardRelativePathBuf,
    exec_path: ForwardRelativePathBuf,
    kind: ArtifactKind,
}

/// A build-system-level identity for a file or directory, decoupled from its
/// on-disk path. Artifacts are value-equal by identity and own no filesystem
/// state.
#[derive(Debug, Clone, Dupe, PartialEq, Eq, Hash)]
pub struct Artifact(Arc<ArtifactData>);

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.exec_path)
    }
}

impl Artifact {
    fn new(
        root: ForwardRelativePathBuf,
        root_relative: ForwardRelativePathBuf,
        kind: ArtifactKind,
    ) -> Artifact {
        let exec_path = root.join(&root_relative);
        Artifact(Arc::new(ArtifactData {
            root,
            root_relative,
            exec_path,
            kind,
        }))
    }

    pub fn file(root: ForwardRelativePathBuf, root_relative: ForwardRelativePathBuf) -> Artifact {
        Artifact::new(root, root_relative, ArtifactKind::File)
    }

    pub fn unresolved_symlink(
        root: ForwardRelativePathBuf,
        root_relative: ForwardRelativePathBuf,
    ) -> Artifact {
        Artifact::new(root, root_relative, ArtifactKind::UnresolvedSymlink)
    }

    pub fn tree(root: ForwardRelativePathBuf, root_relative: ForwardRelativePathBuf) -> Artifact {
        Artifact::new(root, root_relative, ArtifactKind::Tree)
    }

    pub fn middleman(
        root: ForwardRelativePathBuf,
        root_relative: ForwardRelativePathBuf,
    ) -> Artifact {
        Artifact::new(root, root_relative, ArtifactKind::Middleman)
    }

    pub fn constant_metadata(
        root: ForwardRelativePathBuf,
        root_relative: ForwardRelativePathBuf,
    ) -> Artifact {
        Artifact::new(root, root_relative, ArtifactKind::ConstantMetadata)
    }

    /// The identity of the file at `parent_relative` beneath a tree artifact.
    pub fn tree_child(parent: &Artifact, parent_relative: &ForwardRelativePath) -> Artifact {
        assert!(
            parent.is_tree_artifact(),
            "{} is not a tree artifact",
            parent
        );
        Artifact::new(
            parent.root().to_buf(),
            parent.root_relative().join(parent_relative),
            ArtifactKind::TreeChild {
                parent: parent.dupe(),
                parent_relative: parent_relative.to_buf(),
            },
        )
    }

    /// The canonical location of the single-file archive of a tree artifact:
    /// a reserved directory inside the tree's own root.
    pub fn archived_for_tree(parent: &Artifact) -> Artifact {
        assert!(
            parent.is_tree_artifact(),
            "{} is not a tree artifact",
            parent
        );
        let root_relative = ForwardRelativePath::unchecked_new(ARCHIVED_TREE_DIR)
            .join(&parent.root_relative().with_appended_suffix(".zip"));
        Artifact::new(parent.root().to_buf(), root_relative, ArtifactKind::File)
    }

    pub fn root(&self) -> &ForwardRelativePath {
        &self.0.root
    }

    pub fn root_relative(&self) -> &ForwardRelativePath {
        &self.0.root_relative
    }

    /// The path of this artifact relative to the exec root.
    pub fn exec_path(&self) -> &ForwardRelativePath {
        &self.0.exec_path
    }

    pub fn kind(&self) -> &ArtifactKind {
        &self.0.kind
    }

    pub fn is_tree_artifact(&self) -> bool {
        matches!(self.0.kind, ArtifactKind::Tree)
    }

    pub fn is_middleman_artifact(&self) -> bool {
        matches!(self.0.kind, ArtifactKind::Middleman)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.0.kind, ArtifactKind::UnresolvedSymlink)
    }

    pub fn is_constant_metadata(&self) -> bool {
        matches!(self.0.kind, ArtifactKind::ConstantMetadata)
    }

    pub fn is_tree_child(&self) -> bool {
        matches!(self.0.kind, ArtifactKind::TreeChild { .. })
    }

    /// The tree artifact this is a child of, if any.
    pub fn parent(&self) -> Option<&Artifact> {
        match &self.0.kind {
            ArtifactKind::TreeChild { parent, .. } => Some(parent),
            _ => None,
        }
    }

    /// For a tree child, its path relative to the parent tree.
    pub fn parent_relative(&self) -> Option<&ForwardRelativePath> {
        match &self.0.kind {
            ArtifactKind::TreeChild {
                parent_relative, ..
            } => Some(parent_relative),
            _ => None,
        }
    }
}

/// Maps artifacts to the absolute filesystem paths they live at. All action
/// input/output paths are rooted at the exec root.
#[derive(Debug, Clone)]
pub struct ArtifactPathResolver {
    exec_root: AbsNormPathBuf,
}

impl ArtifactPathResolver {
    pub fn new(exec_root: AbsNormPathBuf) -> ArtifactPathResolver {
        ArtifactPathResolver { exec_root }
    }

    pub fn exec_root(&self) -> &AbsNormPathBuf {
        &self.exec_root
    }

    pub fn resolve(&self, artifact: &Artifact) -> AbsNormPathBuf {
        self.exec_root.join(artifact.exec_path())
    }
}

/// An input to an action: either an artifact, or a bare exec path (fileset
/// entries surface this way).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionInput {
    Artifact(Artifact),
    Path(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str) -> ForwardRelativePathBuf {
        ForwardRelativePathBuf::unchecked_new(s.to_owned())
    }

    #[test]
    fn exec_path_is_root_joined_with_root_relative() {
        let a = Artifact::file(rel("out"), rel("pkg/a.txt"));
        assert_eq!("out/pkg/a.txt", a.exec_path().as_str());
        assert_eq!("out", a.root().as_str());
        assert_eq!("pkg/a.txt", a.root_relative().as_str());
    }

    #[test]
    fn artifacts_are_value_equal_by_identity() {
        let a = Artifact::file(rel("out"), rel("a"));
        let b = Artifact::file(rel("out"), rel("a"));
        let c = Artifact::tree(rel("out"), rel("a"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn tree_child_points_back_at_its_parent() {
        let tree = Artifact::tree(rel("out"), rel("dir"));
        let child = Artifact::tree_child(&tree, ForwardRelativePath::unchecked_new("x/1"));
        assert_eq!("out/dir/x/1", child.exec_path().as_str());
        assert_eq!(Some(&tree), child.parent());
        assert_eq!("x/1", child.parent_relative().unwrap().as_str());
    }

    #[test]
    fn archived_artifact_lives_in_the_reserved_dir() {
        let tree = Artifact::tree(rel("out"), rel("pkg/dir"));
        let archived = Artifact::archived_for_tree(&tree);
        assert_eq!("out/.archived/pkg/dir.zip", archived.exec_path().as_str());
    }

    #[cfg(not(windows))]
    #[test]
    fn resolver_roots_artifacts_at_the_exec_root() -> anyhow::Result<()> {
        use quarry_core::fs::paths::AbsNormPath;

        let resolver = ArtifactPathResolver::new(AbsNormPath::new("/exec")?.to_buf());
        let a = Artifact::file(rel("out"), rel("a"));
        assert_eq!("/exec/out/a", resolver.resolve(&a).to_string());
        Ok(())
    }
}
