/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::borrow::Borrow;
use std::ops::Deref;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use ref_cast::RefCast;
use thiserror::Error;

use crate::fs::paths::ForwardRelativePath;
use crate::fs::paths::ForwardRelativePathBuf;

/// An absolute path that contains no `.` or `..` components.
#[derive(Debug, RefCast, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct AbsNormPath(Path);

/// The owned version of 'AbsNormPath'.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbsNormPathBuf(PathBuf);

#[derive(Error, Debug)]
enum AbsNormPathError {
    #[error("expected an absolute path but got a relative path instead: `{0}`")]
    PathNotAbsolute(String),
    #[error("expected a normalized path but got a non-normalized path instead: `{0}`")]
    PathNotNormalized(String),
    #[error("`{0}` is not under `{1}`")]
    StripPrefix(String, String),
}

fn verify<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if !path.is_absolute() {
        return Err(AbsNormPathError::PathNotAbsolute(path.display().to_string()).into());
    }
    for c in path.components() {
        if matches!(c, Component::CurDir | Component::ParentDir) {
            return Err(AbsNormPathError::PathNotNormalized(path.display().to_string()).into());
        }
    }
    Ok(())
}

impl AbsNormPath {
    pub fn new<P: ?Sized + AsRef<Path>>(path: &P) -> anyhow::Result<&AbsNormPath> {
        verify(path)?;
        Ok(AbsNormPath::ref_cast(path.as_ref()))
    }

    #[inline]
    pub fn unchecked_new<P: ?Sized + AsRef<Path>>(path: &P) -> &AbsNormPath {
        AbsNormPath::ref_cast(path.as_ref())
    }

    #[inline]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Creates an owned 'AbsNormPathBuf' with `path` adjoined to self.
    pub fn join<P: AsRef<ForwardRelativePath>>(&self, path: P) -> AbsNormPathBuf {
        let path = path.as_ref();
        if path.is_empty() {
            AbsNormPathBuf(self.0.to_path_buf())
        } else {
            AbsNormPathBuf(self.0.join(path.as_path()))
        }
    }

    /// Relativizes `path` against self, erroring if it is not underneath.
    pub fn relativize<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<ForwardRelativePathBuf> {
        let path = path.as_ref();
        let rem = path.strip_prefix(&self.0).map_err(|_| {
            AbsNormPathError::StripPrefix(
                path.display().to_string(),
                self.0.display().to_string(),
            )
        })?;
        Ok(ForwardRelativePath::new(rem)?.to_buf())
    }

    #[inline]
    pub fn to_buf(&self) -> AbsNormPathBuf {
        AbsNormPathBuf(self.0.to_path_buf())
    }
}

impl AbsNormPathBuf {
    pub fn new(path: PathBuf) -> anyhow::Result<AbsNormPathBuf> {
        verify(&path)?;
        Ok(AbsNormPathBuf(path))
    }

    #[inline]
    pub fn unchecked_new(path: PathBuf) -> AbsNormPathBuf {
        AbsNormPathBuf(path)
    }

    #[inline]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[inline]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl Deref for AbsNormPathBuf {
    type Target = AbsNormPath;

    #[inline]
    fn deref(&self) -> &AbsNormPath {
        AbsNormPath::ref_cast(&self.0)
    }
}

impl Borrow<AbsNormPath> for AbsNormPathBuf {
    #[inline]
    fn borrow(&self) -> &AbsNormPath {
        self
    }
}

impl ToOwned for AbsNormPath {
    type Owned = AbsNormPathBuf;

    #[inline]
    fn to_owned(&self) -> AbsNormPathBuf {
        self.to_buf()
    }
}

impl AsRef<Path> for AbsNormPath {
    #[inline]
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for AbsNormPathBuf {
    #[inline]
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<AbsNormPath> for AbsNormPath {
    #[inline]
    fn as_ref(&self) -> &AbsNormPath {
        self
    }
}

impl AsRef<AbsNormPath> for AbsNormPathBuf {
    #[inline]
    fn as_ref(&self) -> &AbsNormPath {
        self
    }
}

impl std::fmt::Display for AbsNormPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl std::fmt::Display for AbsNormPathBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
