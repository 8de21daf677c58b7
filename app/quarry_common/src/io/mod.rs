/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

pub mod fs;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dupe::Dupe;
use quarry_core::fs::paths::AbsNormPath;
use quarry_core::fs::paths::AbsNormPathBuf;
use quarry_core::fs::paths::ForwardRelativePath;
use thiserror::Error;

use crate::file_ops::FileDigest;
use crate::file_ops::FileStat;
use crate::file_ops::FileType;
use crate::liveliness::LivelinessManager;

#[derive(Clone, Dupe, Copy, Debug, PartialEq, Eq)]
pub enum FollowSymlinks {
    Follow,
    NoFollow,
}

#[derive(Error, Debug)]
pub enum WalkError {
    /// Cooperative cancellation was observed mid-walk. Distinct from I/O
    /// failure: partial results must be discarded, not reported.
    #[error("tree walk was interrupted")]
    Interrupted,
}

/// Invoked for every descendant of a visited tree, from multiple worker
/// threads at once. Implementations synchronize their own state.
pub trait TreeVisitor: Send + Sync {
    fn visit(&self, parent_relative: &ForwardRelativePath, file_type: FileType)
        -> anyhow::Result<()>;
}

/// The filesystem operations the metadata layer is written against. The
/// production implementation talks to the local disk; tests and action
/// filesystems backed by remote storage substitute their own.
#[async_trait]
pub trait ActionIo: Send + Sync {
    /// Returns `None` if the path does not exist.
    fn stat_if_exists(
        &self,
        path: &AbsNormPath,
        follow: FollowSymlinks,
    ) -> anyhow::Result<Option<FileStat>>;

    fn read_link(&self, path: &AbsNormPath) -> anyhow::Result<PathBuf>;

    /// Fully resolves symlinks. The OS enforces its own cycle limit; callers
    /// additionally refuse results that resolve back to the input.
    fn resolve_symlinks(&self, path: &AbsNormPath) -> anyhow::Result<AbsNormPathBuf>;

    /// Best-effort; idempotent.
    fn chmod(&self, path: &AbsNormPath, mode: u32) -> anyhow::Result<()>;

    /// A digest some filesystem layer already knows for this path, if any.
    fn fast_digest(&self, path: &AbsNormPath) -> anyhow::Result<Option<FileDigest>>;

    /// Recursively visits every descendant of `root` with internal
    /// parallelism. `liveliness` is polled between directories; a dead
    /// manager surfaces as [`WalkError::Interrupted`].
    async fn visit_tree(
        &self,
        root: &AbsNormPath,
        visitor: Arc<dyn TreeVisitor>,
        liveliness: Arc<dyn LivelinessManager>,
    ) -> anyhow::Result<()>;
}
