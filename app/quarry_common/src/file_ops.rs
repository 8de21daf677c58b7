/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use derive_more::Display;
use dupe::Dupe;
use quarry_core::fs::paths::ForwardRelativePath;
use quarry_core::fs::paths::ForwardRelativePathBuf;
use sha1::Digest;
use sha1::Sha1;

/// What a stat or dirent reports a path to be. `std::fs::FileType` cannot be
/// constructed by hand, which rules it out for scripted filesystems and
/// stored metadata, so the metadata layer carries its own.
#[derive(Clone, Dupe, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum FileType {
    Directory,
    File,
    Symlink,
    /// Sockets, fifos, devices: things stat recognizes but a build output
    /// should never be.
    Unknown,
}

impl From<std::fs::FileType> for FileType {
    fn from(fs_type: std::fs::FileType) -> Self {
        if fs_type.is_symlink() {
            FileType::Symlink
        } else if fs_type.is_dir() {
            FileType::Directory
        } else if fs_type.is_file() {
            FileType::File
        } else {
            FileType::Unknown
        }
    }
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

// The number of bytes required by a SHA1 hash
pub const SHA1_SIZE: usize = 20;

// Files at most this large are digested in one read; the hint is used for
// preallocation only and is never trusted for correctness.
const ONE_READ_LIMIT: u64 = 1024 * 1024;

/// The content identity of a file: a sha1 over the bytes, plus how many
/// bytes there were.
#[derive(Display, Hash, PartialEq, Eq, Clone, Ord, PartialOrd)]
#[display(fmt = "{}:{}", "hex::encode(sha1)", size)]
pub struct FileDigest {
    pub size: u64,
    pub sha1: [u8; SHA1_SIZE],
}

impl fmt::Debug for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// 28 bytes on the stack; a copy is no dearer than a clone.
impl Dupe for FileDigest {}

impl FileDigest {
    pub const fn new(sha1: [u8; SHA1_SIZE], size: u64) -> Self {
        Self { size, sha1 }
    }

    pub fn parse_digest(data: &[u8]) -> Option<[u8; SHA1_SIZE]> {
        let mut sha1 = [0; SHA1_SIZE];
        hex::decode_to_slice(data, &mut sha1).ok()?;
        Some(sha1)
    }

    /// The digest of the file at `file`: the xattr fast path when a
    /// filesystem layer maintains one, a full read otherwise.
    pub fn from_file<P>(file: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = file.as_ref();
        match Self::from_file_attr(file) {
            Some(x) => Ok(x),
            None => Self::from_disk(file, 0),
        }
    }

    /// A digest some filesystem layer recorded in the `user.sha1` xattr, if
    /// any. `xattr::get` reads the attribute of a link itself rather than of
    /// its target, so link chains are resolved up front; resolution applies
    /// the OS symlink depth limit, which also bounds looped chains.
    #[cfg(unix)]
    pub fn from_file_attr(file: &Path) -> Option<Self> {
        use std::fs;

        let mut meta = fs::symlink_metadata(file).ok()?;
        let resolved;
        let file = if meta.is_symlink() {
            resolved = fs::canonicalize(file).ok()?;
            meta = fs::symlink_metadata(&resolved).ok()?;
            resolved.as_path()
        } else {
            file
        };

        let raw = xattr::get(file, "user.sha1").ok().flatten()?;
        Some(Self {
            size: meta.len(),
            sha1: Self::parse_digest(&raw)?,
        })
    }

    /// No extended attributes on Windows.
    #[cfg(windows)]
    pub fn from_file_attr(_file: &Path) -> Option<Self> {
        None
    }

    /// Reads the file and digests its contents. `size_hint` sizes the read
    /// buffer; the returned size is whatever was actually read.
    pub fn from_disk<P: AsRef<Path>>(file: P, size_hint: u64) -> anyhow::Result<Self> {
        let mut f = File::open(file.as_ref())?;
        let mut h = Sha1::new();

        if size_hint > 0 && size_hint <= ONE_READ_LIMIT {
            let mut contents = Vec::with_capacity(size_hint as usize);
            f.read_to_end(&mut contents)?;
            h.update(&contents);
            return Ok(Self {
                size: contents.len() as u64,
                sha1: h.finalize().into(),
            });
        }

        let mut size = 0;
        let mut buffer = [0; 16 * 1024];
        loop {
            let count = f.read(&mut buffer)?;
            if count == 0 {
                break;
            }
            size += count as u64;
            h.update(&buffer[..count]);
        }
        Ok(Self {
            size,
            sha1: h.finalize().into(),
        })
    }

    /// The digest of zero bytes of content.
    pub fn empty() -> Self {
        Self::from_bytes(&[])
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let sha1 = Sha1::digest(bytes).into();
        Self {
            size: bytes.len() as u64,
            sha1,
        }
    }
}

/// A cheap identity for an unchanged-check when re-hashing is not worth it.
/// Derived from the stat the file value was built from.
#[derive(Debug, Clone, Dupe, Copy, PartialEq, Eq, Hash)]
pub struct ContentsProxy {
    pub ctime: i64,
    pub dev: u64,
    pub ino: u64,
}

/// The permission regime applied to freshly produced outputs.
#[derive(Debug, Clone, Dupe, Copy, PartialEq, Eq)]
pub enum OutputPermissions {
    Readonly,
    Writable,
}

impl OutputPermissions {
    pub fn mode(self) -> u32 {
        match self {
            OutputPermissions::Readonly => 0o555,
            OutputPermissions::Writable => 0o755,
        }
    }
}

/// The result of a stat. Some filesystem layers are able to embed a digest,
/// or full metadata, alongside the plain stat fields; when present, callers
/// prefer those over recomputing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub file_type: FileType,
    pub size: u64,
    /// Milliseconds since the epoch.
    pub mtime: i64,
    /// Milliseconds since the epoch.
    pub ctime: i64,
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    /// Digest embedded by a filesystem layer that can produce one cheaply.
    pub digest: Option<FileDigest>,
    /// Full metadata embedded by an action filesystem backed by remote
    /// storage.
    pub embedded: Option<FileValue>,
}

impl FileStat {
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> FileStat {
        use std::os::unix::fs::MetadataExt;

        FileStat {
            file_type: FileType::from(meta.file_type()),
            size: meta.len(),
            mtime: meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000,
            ctime: meta.ctime() * 1000 + meta.ctime_nsec() / 1_000_000,
            dev: meta.dev(),
            ino: meta.ino(),
            mode: meta.mode() & 0o7777,
            digest: None,
            embedded: None,
        }
    }

    #[cfg(windows)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> FileStat {
        use std::time::UNIX_EPOCH;

        let millis = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_millis() as i64)
        };

        FileStat {
            file_type: FileType::from(meta.file_type()),
            size: meta.len(),
            mtime: millis(meta.modified()),
            ctime: millis(meta.created()),
            dev: 0,
            ino: 0,
            mode: if meta.permissions().readonly() { 0o555 } else { 0o755 },
            digest: None,
            embedded: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_type.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }

    pub fn contents_proxy(&self) -> ContentsProxy {
        ContentsProxy {
            ctime: self.ctime,
            dev: self.dev,
            ino: self.ino,
        }
    }
}

/// Metadata for one file-like artifact, as stored for an action's inputs and
/// outputs. Values are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileValue {
    /// Declared but not present on the filesystem.
    Missing,
    /// Declared but deliberately not produced by the action.
    Omitted,
    /// The default value for an aggregation marker output that never had a
    /// digest injected.
    Middleman,
    /// Carries only a digest. Used for virtual artifacts and for the
    /// aggregate identity of a tree.
    Proxy { digest: Vec<u8> },
    RegularFile {
        digest: Option<FileDigest>,
        proxy: Option<ContentsProxy>,
        size: u64,
        /// The content lives in a remote store and was not necessarily
        /// downloaded.
        remote: bool,
        /// Where remote-only content was surfaced locally, when it was
        /// materialized as a symlink to a shared blob.
        materialization_exec_path: Option<ForwardRelativePathBuf>,
    },
    /// An unresolved symlink output; the digest covers the link target text.
    Symlink { target: PathBuf, digest: FileDigest },
    /// Directories are keyed by mtime; they do not carry a content digest.
    Directory { mtime: i64 },
    /// Special files (sockets, devices) only get an unchanged-check identity.
    Special { proxy: ContentsProxy },
}

impl FileValue {
    pub fn for_unresolved_symlink(target: PathBuf) -> Self {
        let digest = FileDigest::from_bytes(target.to_string_lossy().as_bytes());
        FileValue::Symlink { target, digest }
    }

    pub fn for_directory_with_mtime(mtime: i64) -> Self {
        FileValue::Directory { mtime }
    }

    /// Whether this value describes something that exists on disk (or in a
    /// remote store). The two sentinels do not.
    pub fn exists(&self) -> bool {
        !matches!(self, FileValue::Missing | FileValue::Omitted)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, FileValue::RegularFile { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, FileValue::Symlink { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileValue::Directory { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, FileValue::RegularFile { remote: true, .. })
    }

    pub fn digest(&self) -> Option<&[u8]> {
        match self {
            FileValue::Proxy { digest } => Some(digest),
            FileValue::RegularFile { digest, .. } => digest.as_ref().map(|d| &d.sha1[..]),
            FileValue::Symlink { digest, .. } => Some(&digest.sha1[..]),
            _ => None,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            FileValue::RegularFile { size, .. } => *size,
            _ => 0,
        }
    }

    pub fn materialization_exec_path(&self) -> Option<&ForwardRelativePath> {
        match self {
            FileValue::RegularFile {
                materialization_exec_path,
                ..
            } => materialization_exec_path.as_deref(),
            _ => None,
        }
    }

    /// Rewrites a remote value to record where it was materialized locally.
    pub fn with_materialization_exec_path(self, path: ForwardRelativePathBuf) -> Self {
        match self {
            FileValue::RegularFile {
                digest,
                proxy,
                size,
                remote,
                ..
            } => FileValue::RegularFile {
                digest,
                proxy,
                size,
                remote,
                materialization_exec_path: Some(path),
            },
            other => other,
        }
    }

    /// Completes a digest-less regular file value with a digest computed (or
    /// injected) by the caller.
    pub fn with_injected_digest(self, injected: FileDigest) -> Self {
        match self {
            FileValue::RegularFile {
                proxy,
                size,
                remote,
                materialization_exec_path,
                ..
            } => FileValue::RegularFile {
                digest: Some(injected),
                proxy,
                size,
                remote,
                materialization_exec_path,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_display_is_hash_colon_size() {
        let d = FileDigest::from_bytes(b"foo");
        assert_eq!(
            "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33:3",
            format!("{}", d)
        );
    }

    #[test]
    fn digest_from_disk_ignores_wrong_hint() -> anyhow::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let file = tempdir.path().join("f");
        std::fs::write(&file, b"hello world")?;

        let direct = FileDigest::from_bytes(b"hello world");
        // The hint is only a buffer-size suggestion.
        assert_eq!(direct, FileDigest::from_disk(&file, 3)?);
        assert_eq!(direct, FileDigest::from_disk(&file, 0)?);
        assert_eq!(direct, FileDigest::from_disk(&file, 1 << 30)?);
        Ok(())
    }

    #[test]
    fn symlink_value_digests_the_target() {
        let v = FileValue::for_unresolved_symlink(PathBuf::from("to/dest"));
        assert!(v.is_symlink());
        assert_eq!(
            Some(&FileDigest::from_bytes(b"to/dest").sha1[..]),
            v.digest()
        );
    }

    #[test]
    fn sentinels_do_not_exist() {
        assert!(!FileValue::Missing.exists());
        assert!(!FileValue::Omitted.exists());
        assert!(FileValue::Middleman.exists());
        assert!(FileValue::for_directory_with_mtime(1).exists());
    }

    #[cfg(unix)]
    mod unix {
        use std::fs;
        use std::os::unix::fs::symlink;

        use anyhow::Context;

        use super::*;

        #[test]
        fn xattr_digest_is_read_through_link_chains() -> anyhow::Result<()> {
            let tempdir = tempfile::tempdir()?;

            let target = tempdir.path().join("target");
            fs::write(&target, "foo")?;
            let recorded = hex::encode(FileDigest::from_bytes(b"foo").sha1);
            if xattr::set(&target, "user.sha1", recorded.as_bytes()).is_err() {
                // Filesystem without user xattr support.
                return Ok(());
            }

            symlink("target", tempdir.path().join("link"))?;
            symlink(tempdir.path().join("target"), tempdir.path().join("abs_link"))?;
            symlink("link", tempdir.path().join("link_to_link"))?;

            let direct = FileDigest::from_file_attr(&target).context("target")?;
            assert_eq!(FileDigest::from_bytes(b"foo"), direct);

            // Every link in a chain reports the attribute of the final
            // target, never a digest of the link text.
            for link in ["link", "abs_link", "link_to_link"] {
                let via_link =
                    FileDigest::from_file_attr(&tempdir.path().join(link)).context(link)?;
                assert_eq!(direct, via_link);
            }

            Ok(())
        }

        #[test]
        fn xattr_digest_gives_up_on_looped_links() -> anyhow::Result<()> {
            let tempdir = tempfile::tempdir()?;

            symlink("loop_a", tempdir.path().join("loop_b"))?;
            symlink("loop_b", tempdir.path().join("loop_a"))?;

            assert!(FileDigest::from_file_attr(&tempdir.path().join("loop_a")).is_none());

            Ok(())
        }

        #[test]
        fn stat_record_has_contents_proxy_fields() -> anyhow::Result<()> {
            let tempdir = tempfile::tempdir()?;
            let file = tempdir.path().join("f");
            fs::write(&file, b"x")?;

            let stat = FileStat::from_metadata(&fs::symlink_metadata(&file)?);
            assert!(stat.is_file());
            assert_eq!(1, stat.size);
            let proxy = stat.contents_proxy();
            assert_ne!(0, proxy.ino);
            Ok(())
        }
    }
}
