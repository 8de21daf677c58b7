/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use dupe::Dupe;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use quarry_core::fs::fs_util;
use quarry_core::fs::paths::AbsNormPath;
use quarry_core::fs::paths::AbsNormPathBuf;
use quarry_core::fs::paths::ForwardRelativePath;
use quarry_core::fs::paths::ForwardRelativePathBuf;

use crate::file_ops::FileDigest;
use crate::file_ops::FileStat;
use crate::file_ops::FileType;
use crate::io::ActionIo;
use crate::io::FollowSymlinks;
use crate::io::TreeVisitor;
use crate::io::WalkError;
use crate::liveliness::LivelinessManager;

/// [`ActionIo`] reading the local disk. Tree visitation fans directories out
/// onto the runtime's blocking pool, one task per directory.
pub struct FsActionIo;

impl FsActionIo {
    pub fn new() -> Arc<dyn ActionIo> {
        Arc::new(FsActionIo)
    }
}

#[async_trait]
impl ActionIo for FsActionIo {
    fn stat_if_exists(
        &self,
        path: &AbsNormPath,
        follow: FollowSymlinks,
    ) -> anyhow::Result<Option<FileStat>> {
        let res = match follow {
            FollowSymlinks::Follow => std::fs::metadata(path.as_path()),
            FollowSymlinks::NoFollow => std::fs::symlink_metadata(path.as_path()),
        };
        match res {
            Ok(meta) => Ok(Some(FileStat::from_metadata(&meta))),
            Err(ref err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat({})", path)),
        }
    }

    fn read_link(&self, path: &AbsNormPath) -> anyhow::Result<PathBuf> {
        fs_util::read_link(path.as_path())
    }

    fn resolve_symlinks(&self, path: &AbsNormPath) -> anyhow::Result<AbsNormPathBuf> {
        AbsNormPathBuf::new(fs_util::canonicalize(path.as_path())?)
    }

    #[cfg(unix)]
    fn chmod(&self, path: &AbsNormPath, mode: u32) -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        fs_util::set_permissions(path.as_path(), std::fs::Permissions::from_mode(mode))
    }

    #[cfg(windows)]
    fn chmod(&self, path: &AbsNormPath, mode: u32) -> anyhow::Result<()> {
        let mut perm = fs_util::symlink_metadata(path.as_path())?.permissions();
        perm.set_readonly(mode & 0o200 == 0);
        fs_util::set_permissions(path.as_path(), perm)
    }

    fn fast_digest(&self, path: &AbsNormPath) -> anyhow::Result<Option<FileDigest>> {
        Ok(FileDigest::from_file_attr(path.as_path()))
    }

    async fn visit_tree(
        &self,
        root: &AbsNormPath,
        visitor: Arc<dyn TreeVisitor>,
        liveliness: Arc<dyn LivelinessManager>,
    ) -> anyhow::Result<()> {
        let mut work = FuturesUnordered::new();
        work.push(visit_dir(
            root.to_buf(),
            ForwardRelativePathBuf::empty(),
            visitor.dupe(),
        ));

        while let Some(subdirs) = work.next().await {
            for rel in subdirs? {
                if !liveliness.is_alive().await {
                    return Err(WalkError::Interrupted.into());
                }
                work.push(visit_dir(root.join(&rel), rel, visitor.dupe()));
            }
        }

        Ok(())
    }
}

/// Visits the direct entries of one directory on the blocking pool and
/// returns the subdirectories still to walk.
async fn visit_dir(
    dir: AbsNormPathBuf,
    rel: ForwardRelativePathBuf,
    visitor: Arc<dyn TreeVisitor>,
) -> anyhow::Result<Vec<ForwardRelativePathBuf>> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<ForwardRelativePathBuf>> {
        let mut subdirs = Vec::new();
        for entry in fs_util::read_dir(dir.as_path())? {
            let entry = entry.with_context(|| format!("read_dir({})", dir))?;
            let file_type = FileType::from(
                entry
                    .file_type()
                    .with_context(|| format!("file_type({})", entry.path().display()))?,
            );
            let name = entry.file_name();
            let name = name
                .to_str()
                .with_context(|| format!("filename is not UTF-8: {}", entry.path().display()))?;
            let child_rel = rel.join(ForwardRelativePath::new(name)?);

            visitor.visit(&child_rel, file_type)?;

            if file_type.is_dir() {
                subdirs.push(child_rel);
            }
        }
        Ok(subdirs)
    })
    .await
    .context("tree visitation task aborted")?
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use parking_lot::Mutex;

    use super::*;
    use crate::liveliness::LivelinessGuard;
    use crate::liveliness::NoopLivelinessManager;

    struct CollectingVisitor {
        seen: Mutex<BTreeSet<(String, FileType)>>,
    }

    impl TreeVisitor for CollectingVisitor {
        fn visit(
            &self,
            parent_relative: &ForwardRelativePath,
            file_type: FileType,
        ) -> anyhow::Result<()> {
            self.seen
                .lock()
                .insert((parent_relative.as_str().to_owned(), file_type));
            Ok(())
        }
    }

    #[tokio::test]
    async fn visit_tree_sees_every_descendant() -> anyhow::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let root = tempdir.path().canonicalize()?;
        fs_util::create_dir_all(root.join("x"))?;
        fs_util::create_dir_all(root.join("y/z"))?;
        fs_util::write(root.join("x/1"), b"1")?;
        fs_util::write(root.join("x/2"), b"2")?;
        fs_util::write(root.join("y/z/3"), b"3")?;

        let visitor = Arc::new(CollectingVisitor {
            seen: Mutex::new(BTreeSet::new()),
        });
        FsActionIo
            .visit_tree(
                AbsNormPath::new(&root)?,
                visitor.clone(),
                NoopLivelinessManager::create(),
            )
            .await?;

        let seen = visitor.seen.lock();
        let expect: BTreeSet<(String, FileType)> = [
            ("x".to_owned(), FileType::Directory),
            ("x/1".to_owned(), FileType::File),
            ("x/2".to_owned(), FileType::File),
            ("y".to_owned(), FileType::Directory),
            ("y/z".to_owned(), FileType::Directory),
            ("y/z/3".to_owned(), FileType::File),
        ]
        .into_iter()
        .collect();
        assert_eq!(expect, *seen);
        Ok(())
    }

    #[tokio::test]
    async fn visit_tree_observes_cancellation() -> anyhow::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let root = tempdir.path().canonicalize()?;
        fs_util::create_dir_all(root.join("a/b"))?;
        fs_util::write(root.join("a/b/f"), b"f")?;

        let (liveliness, guard) = LivelinessGuard::create();
        drop(guard);

        let visitor = Arc::new(CollectingVisitor {
            seen: Mutex::new(BTreeSet::new()),
        });
        let err = FsActionIo
            .visit_tree(AbsNormPath::new(&root)?, visitor, liveliness)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<WalkError>().is_some());
        Ok(())
    }
}
