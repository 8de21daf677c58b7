/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Discovers the contents of a tree artifact by walking its directory in
//! parallel and building a [`TreeValue`] out of the children.

use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use dupe::Dupe;
use parking_lot::Mutex;
use quarry_common::file_ops::FileType;
use quarry_common::io::ActionIo;
use quarry_common::io::FollowSymlinks;
use quarry_common::io::TreeVisitor;
use quarry_common::liveliness::LivelinessManager;
use quarry_core::fs::paths::AbsNormPath;
use quarry_core::fs::paths::AbsNormPathBuf;
use quarry_core::fs::paths::ForwardRelativePath;

use crate::artifact::Artifact;
use crate::artifact::ArtifactPathResolver;
use crate::entry::construct_file_value;
use crate::tree_value::TreeValue;
use crate::tree_value::TreeValueBuilder;
use crate::tsgm::TimestampGranularityMonitor;

pub(crate) struct TreeBuildContext {
    pub io: Arc<dyn ActionIo>,
    pub resolver: ArtifactPathResolver,
    pub tsgm: Option<Arc<TimestampGranularityMonitor>>,
    pub liveliness: Arc<dyn LivelinessManager>,
    /// Some(mode) during execution, when fresh outputs get their permissions
    /// set before statting so that the observed ctime is current.
    pub chmod: Option<u32>,
    pub archived_trees_enabled: bool,
}

struct TreeWalkVisitor {
    parent: Artifact,
    tree_dir: AbsNormPathBuf,
    io: Arc<dyn ActionIo>,
    resolver: ArtifactPathResolver,
    tsgm: Option<Arc<TimestampGranularityMonitor>>,
    chmod: Option<u32>,
    any_remote: AtomicBool,
    builder: Mutex<TreeValueBuilder>,
}

impl TreeVisitor for TreeWalkVisitor {
    fn visit(
        &self,
        parent_relative: &ForwardRelativePath,
        file_type: FileType,
    ) -> anyhow::Result<()> {
        if let Some(mode) = self.chmod {
            if !file_type.is_symlink() {
                self.io.chmod(&self.tree_dir.join(parent_relative), mode)?;
            }
        }
        if file_type.is_dir() {
            // The final TreeValue does not contain child directories.
            return Ok(());
        }

        let child = Artifact::tree_child(&self.parent, parent_relative);
        let value = construct_file_value(
            &child,
            &self.resolver,
            &*self.io,
            None,
            None,
            self.tsgm.as_deref(),
        )
        .with_context(|| {
            format!(
                "failed to resolve {} inside tree artifact {}; \
                 the file is either missing or an invalid symlink",
                parent_relative, self.tree_dir
            )
        })?;

        if value.is_remote() {
            self.any_remote.store(true, Ordering::Relaxed);
        }
        self.builder.lock().put_child(&child, value);
        Ok(())
    }
}

pub(crate) async fn construct_tree_value_from_filesystem(
    ctx: &TreeBuildContext,
    parent: &Artifact,
) -> anyhow::Result<TreeValue> {
    let tree_dir = ctx.resolver.resolve(parent);

    let stat = ctx.io.stat_if_exists(&tree_dir, FollowSymlinks::Follow)?;

    // The tree root is put in place when the action is initialized, so it
    // only fails to be a directory if the action itself replaced it.
    if !stat.as_ref().map_or(false, |s| s.is_dir()) {
        if let Some(mode) = ctx.chmod {
            set_path_permissions_if_file(&*ctx.io, &tree_dir, mode)?;
        }
        return Ok(TreeValue::Missing);
    }

    if let Some(mode) = ctx.chmod {
        ctx.io.chmod(&tree_dir, mode)?;
    }

    let visitor = Arc::new(TreeWalkVisitor {
        parent: parent.dupe(),
        tree_dir: tree_dir.clone(),
        io: ctx.io.dupe(),
        resolver: ctx.resolver.clone(),
        tsgm: ctx.tsgm.clone(),
        chmod: ctx.chmod,
        any_remote: AtomicBool::new(false),
        builder: Mutex::new(TreeValueBuilder::new(parent.dupe())),
    });

    ctx.io
        .visit_tree(&tree_dir, visitor.dupe(), ctx.liveliness.dupe())
        .await?;

    let mut builder = {
        let mut guard = visitor.builder.lock();
        mem::replace(&mut *guard, TreeValueBuilder::new(parent.dupe()))
    };

    if ctx.archived_trees_enabled {
        let archived = Artifact::archived_for_tree(parent);
        let archived_path = ctx.resolver.resolve(&archived);
        match ctx
            .io
            .stat_if_exists(&archived_path, FollowSymlinks::NoFollow)?
        {
            Some(archived_stat) => {
                let value = construct_file_value(
                    &archived,
                    &ctx.resolver,
                    &*ctx.io,
                    Some(archived_stat),
                    None,
                    ctx.tsgm.as_deref(),
                )?;
                builder.set_archived_representation(archived, value);
            }
            None => {
                tracing::info!("Archived tree artifact not created: {}", archived_path);
            }
        }
    }

    // Same rationale as for regular outputs: a remote tree materialized as a
    // symlink records where, so it is not downloaded again.
    if visitor.any_remote.load(Ordering::Relaxed) {
        let lstat = ctx.io.stat_if_exists(&tree_dir, FollowSymlinks::NoFollow)?;
        if lstat.map_or(false, |s| s.is_symlink()) {
            if let Some(embedded) = stat.as_ref().and_then(|s| s.embedded.as_ref()) {
                let exec_path = match embedded.materialization_exec_path() {
                    Some(p) => p.to_buf(),
                    None => {
                        let real = ctx.io.resolve_symlinks(&tree_dir)?;
                        ctx.resolver.exec_root().relativize(real.as_path())?
                    }
                };
                builder.set_materialization_exec_path(exec_path);
            }
        }
    }

    Ok(builder.build())
}

/// Sets output permissions only when the path is a regular file whose current
/// mode differs.
pub(crate) fn set_path_permissions_if_file(
    io: &dyn ActionIo,
    path: &AbsNormPath,
    mode: u32,
) -> anyhow::Result<()> {
    match io.stat_if_exists(path, FollowSymlinks::NoFollow)? {
        Some(stat) if stat.is_file() && stat.mode != mode => io.chmod(path, mode),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use quarry_common::io::fs::FsActionIo;
    use quarry_common::io::WalkError;
    use quarry_common::liveliness::LivelinessGuard;
    use quarry_common::liveliness::NoopLivelinessManager;
    use quarry_core::fs::fs_util;
    use quarry_core::fs::paths::ForwardRelativePathBuf;

    use super::*;

    fn rel(s: &str) -> ForwardRelativePathBuf {
        ForwardRelativePathBuf::unchecked_new(s.to_owned())
    }

    fn context(exec_root: &std::path::Path) -> anyhow::Result<TreeBuildContext> {
        Ok(TreeBuildContext {
            io: FsActionIo::new(),
            resolver: ArtifactPathResolver::new(AbsNormPathBuf::new(
                exec_root.canonicalize()?,
            )?),
            tsgm: None,
            liveliness: NoopLivelinessManager::create(),
            chmod: None,
            archived_trees_enabled: false,
        })
    }

    #[tokio::test]
    async fn children_are_flattened_to_files() -> anyhow::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let ctx = context(tempdir.path())?;
        let tree = Artifact::tree(rel("out"), rel("dir"));

        let dir = ctx.resolver.resolve(&tree);
        fs_util::create_dir_all(dir.as_path().join("x"))?;
        fs_util::create_dir_all(dir.as_path().join("y"))?;
        fs_util::write(dir.as_path().join("x/1"), b"one")?;
        fs_util::write(dir.as_path().join("x/2"), b"two")?;
        fs_util::write(dir.as_path().join("y/3"), b"three")?;

        let value = construct_tree_value_from_filesystem(&ctx, &tree).await?;
        let children: Vec<&str> = value.child_values().map(|(rel, _)| rel.as_str()).collect();
        assert_eq!(vec!["x/1", "x/2", "y/3"], children);
        assert!(value.child_values().all(|(_, v)| v.is_file()));
        Ok(())
    }

    #[tokio::test]
    async fn missing_root_is_the_missing_sentinel() -> anyhow::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let ctx = context(tempdir.path())?;
        let tree = Artifact::tree(rel("out"), rel("never_created"));

        let value = construct_tree_value_from_filesystem(&ctx, &tree).await?;
        assert_eq!(TreeValue::Missing, value);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_walk_is_interrupted_not_built() -> anyhow::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let mut ctx = context(tempdir.path())?;
        let tree = Artifact::tree(rel("out"), rel("dir"));

        let dir = ctx.resolver.resolve(&tree);
        fs_util::create_dir_all(dir.as_path().join("sub"))?;
        fs_util::write(dir.as_path().join("sub/f"), b"f")?;

        let (liveliness, guard) = LivelinessGuard::create();
        drop(guard);
        ctx.liveliness = liveliness;

        let err = construct_tree_value_from_filesystem(&ctx, &tree)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<WalkError>().is_some());
        Ok(())
    }
}
