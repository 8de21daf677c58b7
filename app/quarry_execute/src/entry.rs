/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Builds [`FileValue`]s from the filesystem, merging in anything a stat
//! already knows (embedded digests, embedded metadata) and anything the
//! executor injected.

use dupe::Dupe;
use quarry_common::file_ops::FileDigest;
use quarry_common::file_ops::FileStat;
use quarry_common::file_ops::FileValue;
use quarry_common::io::ActionIo;
use quarry_common::io::FollowSymlinks;
use quarry_core::fs::paths::AbsNormPath;
use quarry_core::fs::paths::AbsNormPathBuf;
use thiserror::Error;

use crate::artifact::Artifact;
use crate::artifact::ArtifactPathResolver;
use crate::tsgm::TimestampGranularityMonitor;

#[derive(Error, Debug)]
pub enum FileValueError {
    #[error("symlink cycle at {0}")]
    SymlinkCycle(AbsNormPathBuf),
    #[error("digest {injected} was injected for {artifact}, but got {computed} from the filesystem")]
    DigestMismatch {
        artifact: String,
        injected: String,
        computed: String,
    },
    #[error("{0} does not exist")]
    NotFound(String),
}

/// What a stat-and-build pass learned about one artifact. `real_path` is only
/// present when the no-follow stat was a symlink; `value` then describes the
/// resolved target.
#[derive(Debug)]
pub struct FileStatAndValue {
    pub path_no_follow: AbsNormPathBuf,
    pub real_path: Option<AbsNormPathBuf>,
    pub stat_no_follow: Option<FileStat>,
    pub value: FileValue,
}

/// Builds a [`FileValue`] for a regular (non-tree, non-middleman) artifact
/// for the purpose of checking whether existing metadata is still valid.
pub fn file_value_from_artifact(
    artifact: &Artifact,
    stat_no_follow: Option<FileStat>,
    resolver: &ArtifactPathResolver,
    io: &dyn ActionIo,
    tsgm: Option<&TimestampGranularityMonitor>,
) -> anyhow::Result<FileValue> {
    Ok(
        build_file_value(artifact, resolver, stat_no_follow, false, io, tsgm)?
            .value,
    )
}

/// Stats (unless a stat is supplied) and builds the raw value for one
/// artifact, resolving symlinks to their target.
pub fn build_file_value(
    artifact: &Artifact,
    resolver: &ArtifactPathResolver,
    stat_no_follow: Option<FileStat>,
    digest_will_be_injected: bool,
    io: &dyn ActionIo,
    tsgm: Option<&TimestampGranularityMonitor>,
) -> anyhow::Result<FileStatAndValue> {
    assert!(
        !artifact.is_tree_artifact() && !artifact.is_middleman_artifact(),
        "{}",
        artifact
    );

    let path_no_follow = resolver.resolve(artifact);

    // If we expect a symlink, we can readlink it directly and handle errors
    // appropriately - there is no need for a stat.
    if artifact.is_symlink() {
        let value = FileValue::for_unresolved_symlink(io.read_link(&path_no_follow)?);
        return Ok(FileStatAndValue {
            path_no_follow,
            real_path: None,
            stat_no_follow,
            value,
        });
    }

    // All output artifacts of an action are deleted before execution, so if a
    // file exists, it was most likely created by the current action. There is
    // a race condition here if an external process creates (or modifies) the
    // file between the deletion and this stat, which we cannot solve.
    let stat_no_follow = match stat_no_follow {
        Some(stat) => Some(stat),
        None => io.stat_if_exists(&path_no_follow, FollowSymlinks::NoFollow)?,
    };

    let is_symlink = stat_no_follow.as_ref().map_or(false, |s| s.is_symlink());
    if !is_symlink {
        let value = file_value_from_stat(
            stat_no_follow.as_ref(),
            &path_no_follow,
            digest_will_be_injected,
            io,
            tsgm,
        )?;
        return Ok(FileStatAndValue {
            path_no_follow,
            real_path: None,
            stat_no_follow,
            value,
        });
    }

    // The stat said symlink, so resolve it fully. Downstream consumers assume
    // they are not dealing with a cycle; the resolution reporting the input
    // back is the one way a cycle survives the OS's own limit.
    let real_path = io.resolve_symlinks(&path_no_follow)?;
    if real_path == path_no_follow {
        return Err(FileValueError::SymlinkCycle(path_no_follow).into());
    }

    let real_stat = io.stat_if_exists(&real_path, FollowSymlinks::NoFollow)?;
    let value = file_value_from_stat(
        real_stat.as_ref(),
        &real_path,
        digest_will_be_injected,
        io,
        tsgm,
    )?;
    Ok(FileStatAndValue {
        path_no_follow,
        real_path: Some(real_path),
        stat_no_follow,
        value,
    })
}

fn file_value_from_stat(
    stat: Option<&FileStat>,
    path: &AbsNormPath,
    digest_will_be_injected: bool,
    io: &dyn ActionIo,
    tsgm: Option<&TimestampGranularityMonitor>,
) -> anyhow::Result<FileValue> {
    let stat = match stat {
        None => return Ok(FileValue::Missing),
        Some(stat) => stat,
    };

    if stat.is_dir() {
        return Ok(FileValue::for_directory_with_mtime(stat.mtime));
    }

    // An action filesystem backed by remote storage hands us complete
    // metadata through the stat.
    if let Some(embedded) = &stat.embedded {
        return Ok(embedded.clone());
    }

    let proxy = stat.contents_proxy();
    if let Some(tsgm) = tsgm {
        tsgm.notify_dependence_on_file_time(stat.mtime.max(stat.ctime));
    }

    if stat.is_file() {
        let digest = match &stat.digest {
            Some(digest) => Some(digest.dupe()),
            None if !digest_will_be_injected => io.fast_digest(path)?,
            None => None,
        };
        return Ok(FileValue::RegularFile {
            digest,
            proxy: Some(proxy),
            size: stat.size,
            remote: false,
            materialization_exec_path: None,
        });
    }

    Ok(FileValue::Special { proxy })
}

/// The full factory: builds a value, preserves remote-materialization
/// information, rejects conflicting digests, and completes digest-less
/// regular files by hashing their contents.
pub fn construct_file_value(
    artifact: &Artifact,
    resolver: &ArtifactPathResolver,
    io: &dyn ActionIo,
    stat_no_follow: Option<FileStat>,
    injected_digest: Option<FileDigest>,
    tsgm: Option<&TimestampGranularityMonitor>,
) -> anyhow::Result<FileValue> {
    assert!(!artifact.is_tree_artifact(), "{} is a tree artifact", artifact);

    // Constant-metadata artifacts must not delay the build through the
    // timestamp granularity monitor.
    let tsgm = if artifact.is_constant_metadata() {
        None
    } else {
        tsgm
    };

    let stat_and_value = build_file_value(
        artifact,
        resolver,
        stat_no_follow,
        injected_digest.is_some(),
        io,
        tsgm,
    )?;
    let mut value = stat_and_value.value;

    // If the artifact is stored remotely but was materialized in the
    // filesystem as a symlink, record the original path in the metadata so it
    // can later be recreated as such instead of downloading another copy.
    if value.is_remote()
        && stat_and_value
            .stat_no_follow
            .as_ref()
            .map_or(false, |s| s.is_symlink())
    {
        if let Some(real_path) = &stat_and_value.real_path {
            let exec_path = resolver.exec_root().relativize(real_path.as_path())?;
            value = value.with_materialization_exec_path(exec_path);
        }
    }

    // An injected digest that disagrees with one the filesystem already
    // provided means the executor and the filesystem observed different
    // contents.
    if let (Some(file_digest), Some(injected)) = (value.digest(), &injected_digest) {
        if file_digest != &injected.sha1[..] {
            return Err(FileValueError::DigestMismatch {
                artifact: artifact.to_string(),
                injected: hex::encode(injected.sha1),
                computed: hex::encode(file_digest),
            }
            .into());
        }
    }

    if !value.exists() {
        // Nonexistent files should only occur before executing an action.
        return Err(FileValueError::NotFound(artifact.to_string()).into());
    }

    if value.is_symlink() {
        // An unresolved symlink always carries a digest: readlink is easy,
        // unlike checksumming a potentially huge target.
        debug_assert!(value.digest().is_some());
        return Ok(value);
    }

    if value.is_directory() {
        // Taken when the output of an action is a directory that is not a
        // declared tree: changes underneath may go undetected since only the
        // directory mtime keys the value.
        return Ok(value);
    }

    if value.digest().is_some() {
        // The digest is in the file value and that is all that is needed for
        // this file's metadata.
        return Ok(value);
    }

    let digest = match injected_digest {
        Some(digest) => digest,
        None => {
            // If the file is a symlink, digest the target path so that the
            // digest cache can hit - the target was probably already digested
            // during a previous action execution.
            let path = match (&stat_and_value.stat_no_follow, &stat_and_value.real_path) {
                (Some(stat), Some(real_path)) if stat.is_symlink() => real_path,
                _ => &stat_and_value.path_no_follow,
            };
            FileDigest::from_disk(path.as_path(), value.size())?
        }
    };

    Ok(value.with_injected_digest(digest))
}
