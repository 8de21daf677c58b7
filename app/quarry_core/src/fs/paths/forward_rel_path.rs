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
use std::path::Path;

use derive_more::Display;
use ref_cast::RefCast;
use relative_path::RelativePath;
use thiserror::Error;

/// A forward pointing, fully normalized relative path and owned pathbuf.
///
/// This means that there is no '.' or '..' in this path, and does not begin
/// with '/'. The path is platform agnostic with only `/` separators.
#[derive(Display, Debug, RefCast, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ForwardRelativePath(str);

/// The owned version of 'ForwardRelativePath'.
#[derive(Display, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ForwardRelativePathBuf(String);

#[derive(Error, Debug)]
enum ForwardRelativePathError {
    #[error("expected a relative path but got an absolute path instead: `{0}`")]
    PathNotRelative(String),
    #[error("expected a normalized path but got a non-normalized path instead: `{0}`")]
    PathNotNormalized(String),
    #[error("Path is not UTF-8: `{0}`")]
    PathNotUtf8(String),
    #[error("`{0}` does not start with `{1}`")]
    StripPrefix(String, String),
}

impl ForwardRelativePath {
    #[inline]
    pub fn unchecked_new<S: ?Sized + AsRef<str>>(s: &S) -> &Self {
        ForwardRelativePath::ref_cast(s.as_ref())
    }

    #[inline]
    pub fn empty() -> &'static Self {
        ForwardRelativePath::unchecked_new("")
    }

    /// Creates a 'ForwardRelativePath' if the given string represents a
    /// forward, normalized relative path, otherwise error.
    pub fn new<S: ?Sized + AsRef<Path>>(s: &S) -> anyhow::Result<&ForwardRelativePath> {
        let path = s.as_ref();
        let s = path
            .to_str()
            .ok_or_else(|| ForwardRelativePathError::PathNotUtf8(path.display().to_string()))?;

        if s.is_empty() {
            return Ok(ForwardRelativePath::unchecked_new(s));
        }
        if s.starts_with('/') {
            return Err(ForwardRelativePathError::PathNotRelative(s.to_owned()).into());
        }
        for segment in s.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
                return Err(ForwardRelativePathError::PathNotNormalized(s.to_owned()).into());
            }
        }

        Ok(ForwardRelativePath::unchecked_new(s))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    #[inline]
    pub fn as_relative_path(&self) -> &RelativePath {
        RelativePath::new(&self.0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Creates an owned 'ForwardRelativePathBuf' with `path` adjoined to self.
    pub fn join<P: AsRef<ForwardRelativePath>>(&self, path: P) -> ForwardRelativePathBuf {
        let path = path.as_ref();
        if self.0.is_empty() {
            path.to_buf()
        } else if path.0.is_empty() {
            self.to_buf()
        } else {
            ForwardRelativePathBuf::unchecked_new(format!("{}/{}", &self.0, &path.0))
        }
    }

    /// Joins a possibly non-normalized 'RelativePath', normalizing `.` and
    /// `..` components. Errors if the result would escape the root.
    pub fn join_normalized<P: AsRef<RelativePath>>(
        &self,
        path: P,
    ) -> anyhow::Result<ForwardRelativePathBuf> {
        let joined = self.as_relative_path().join_normalized(path.as_ref());
        ForwardRelativePath::new(joined.as_str()).map(|p| p.to_buf())
    }

    /// The parent directory of this path, or `None` if there is none.
    pub fn parent(&self) -> Option<&ForwardRelativePath> {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Some(ForwardRelativePath::unchecked_new(parent)),
            None if self.0.is_empty() => None,
            None => Some(ForwardRelativePath::empty()),
        }
    }

    /// The final component of this path, if there is one.
    pub fn file_name(&self) -> Option<&str> {
        match self.0.rsplit_once('/') {
            Some((_, name)) => Some(name),
            None if self.0.is_empty() => None,
            None => Some(&self.0),
        }
    }

    pub fn starts_with<P: AsRef<ForwardRelativePath>>(&self, base: P) -> bool {
        self.strip_prefix_opt(base).is_some()
    }

    /// Strips a given base prefix from this path, per path component.
    pub fn strip_prefix<P: AsRef<ForwardRelativePath>>(
        &self,
        base: P,
    ) -> anyhow::Result<&ForwardRelativePath> {
        let base = base.as_ref();
        self.strip_prefix_opt(base).ok_or_else(|| {
            ForwardRelativePathError::StripPrefix(self.0.to_owned(), base.0.to_owned()).into()
        })
    }

    pub fn strip_prefix_opt<P: AsRef<ForwardRelativePath>>(
        &self,
        base: P,
    ) -> Option<&ForwardRelativePath> {
        let base = base.as_ref();
        if base.0.is_empty() {
            return Some(self);
        }
        let rem = self.0.strip_prefix(&base.0)?;
        if rem.is_empty() {
            Some(ForwardRelativePath::empty())
        } else {
            rem.strip_prefix('/').map(ForwardRelativePath::unchecked_new)
        }
    }

    /// Appends an extension-like suffix to the final component.
    pub fn with_appended_suffix(&self, suffix: &str) -> ForwardRelativePathBuf {
        ForwardRelativePathBuf::unchecked_new(format!("{}{}", &self.0, suffix))
    }

    #[inline]
    pub fn to_buf(&self) -> ForwardRelativePathBuf {
        ForwardRelativePathBuf::unchecked_new(self.0.to_owned())
    }
}

impl ForwardRelativePathBuf {
    #[inline]
    pub fn new(s: String) -> anyhow::Result<ForwardRelativePathBuf> {
        ForwardRelativePath::new(&s)?;
        Ok(ForwardRelativePathBuf(s))
    }

    #[inline]
    pub fn unchecked_new(s: String) -> Self {
        ForwardRelativePathBuf(s)
    }

    #[inline]
    pub fn empty() -> Self {
        ForwardRelativePathBuf(String::new())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for ForwardRelativePathBuf {
    type Target = ForwardRelativePath;

    #[inline]
    fn deref(&self) -> &ForwardRelativePath {
        ForwardRelativePath::unchecked_new(&self.0)
    }
}

impl Borrow<ForwardRelativePath> for ForwardRelativePathBuf {
    #[inline]
    fn borrow(&self) -> &ForwardRelativePath {
        self
    }
}

impl ToOwned for ForwardRelativePath {
    type Owned = ForwardRelativePathBuf;

    #[inline]
    fn to_owned(&self) -> ForwardRelativePathBuf {
        self.to_buf()
    }
}

impl AsRef<ForwardRelativePath> for ForwardRelativePath {
    #[inline]
    fn as_ref(&self) -> &ForwardRelativePath {
        self
    }
}

impl AsRef<ForwardRelativePath> for ForwardRelativePathBuf {
    #[inline]
    fn as_ref(&self) -> &ForwardRelativePath {
        self
    }
}

impl AsRef<str> for ForwardRelativePath {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for ForwardRelativePath {
    #[inline]
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl AsRef<RelativePath> for ForwardRelativePath {
    #[inline]
    fn as_ref(&self) -> &RelativePath {
        RelativePath::new(&self.0)
    }
}

impl<'a> TryFrom<&'a str> for &'a ForwardRelativePath {
    type Error = anyhow::Error;

    fn try_from(s: &'a str) -> anyhow::Result<&'a ForwardRelativePath> {
        ForwardRelativePath::new(s)
    }
}

impl TryFrom<String> for ForwardRelativePathBuf {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<ForwardRelativePathBuf> {
        ForwardRelativePathBuf::new(s)
    }
}
