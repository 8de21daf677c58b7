/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Filesets are collections of output symlinks forming a virtual tree of
//! references to other artifacts. The handler flattens them once, at
//! construction, into an exec-path keyed metadata map.

use std::collections::HashMap;
use std::path::PathBuf;

use dupe::Dupe;
use quarry_common::file_ops::FileValue;
use quarry_core::fs::paths::ForwardRelativePathBuf;
use quarry_core::fs::paths::RelativePath;

use crate::artifact::Artifact;

/// One link of a fileset: where the link lives (exec-root relative), where
/// it points, and the metadata of what it materializes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetOutputSymlink {
    pub name: ForwardRelativePathBuf,
    /// Exec-root-relative, or absolute for links leaving the exec root.
    pub target: PathBuf,
    pub metadata: FileValue,
}

/// What to do with a link whose target is a relative path.
#[derive(Clone, Copy, Dupe, Debug, PartialEq, Eq)]
pub enum RelativeSymlinkBehavior {
    /// Drop the entry.
    Ignore,
    /// Resolve the target against the link's parent directory.
    Resolve,
}

/// The flattened form of one fileset. Construction never fails; entries that
/// cannot be represented under the chosen behavior are skipped.
pub struct FilesetManifest {
    entries: HashMap<ForwardRelativePathBuf, PathBuf>,
    artifact_values: HashMap<ForwardRelativePathBuf, FileValue>,
}

impl FilesetManifest {
    pub fn construct(
        symlinks: &[FilesetOutputSymlink],
        behavior: RelativeSymlinkBehavior,
    ) -> FilesetManifest {
        let mut entries = HashMap::new();
        let mut artifact_values = HashMap::new();

        for link in symlinks {
            let target = if link.target.is_absolute() {
                link.target.clone()
            } else {
                match behavior {
                    RelativeSymlinkBehavior::Ignore => continue,
                    RelativeSymlinkBehavior::Resolve => {
                        let target = match link.target.to_str() {
                            Some(target) => target,
                            None => continue,
                        };
                        let parent = match link.name.parent() {
                            Some(parent) => parent,
                            None => continue,
                        };
                        match parent.join_normalized(RelativePath::new(target)) {
                            Ok(resolved) => PathBuf::from(resolved.as_str()),
                            // Escapes the exec root.
                            Err(..) => continue,
                        }
                    }
                }
            };

            entries.insert(link.name.clone(), target);
            artifact_values.insert(link.name.clone(), link.metadata.clone());
        }

        FilesetManifest {
            entries,
            artifact_values,
        }
    }

    pub fn entries(&self) -> &HashMap<ForwardRelativePathBuf, PathBuf> {
        &self.entries
    }

    pub fn artifact_values(&self) -> &HashMap<ForwardRelativePathBuf, FileValue> {
        &self.artifact_values
    }
}

/// Flattens all of an action's filesets into one exec-path keyed map,
/// skipping entries whose metadata carries no digest (there is nothing to
/// check them against). Built once at handler construction.
pub(crate) fn create_fileset_mapping(
    filesets: &HashMap<Artifact, Vec<FilesetOutputSymlink>>,
) -> HashMap<ForwardRelativePathBuf, FileValue> {
    let mut mapping = HashMap::new();
    for symlinks in filesets.values() {
        let manifest = FilesetManifest::construct(symlinks, RelativeSymlinkBehavior::Resolve);
        for (name, value) in manifest.artifact_values() {
            if value.digest().is_some() {
                mapping.insert(name.clone(), value.clone());
            }
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use quarry_common::file_ops::FileDigest;

    use super::*;

    fn rel(s: &str) -> ForwardRelativePathBuf {
        ForwardRelativePathBuf::unchecked_new(s.to_owned())
    }

    fn value(contents: &[u8]) -> FileValue {
        FileValue::RegularFile {
            digest: Some(FileDigest::from_bytes(contents)),
            proxy: None,
            size: contents.len() as u64,
            remote: false,
            materialization_exec_path: None,
        }
    }

    #[test]
    fn relative_targets_resolve_against_the_link_dir() {
        let links = vec![FilesetOutputSymlink {
            name: rel("fs/sub/link"),
            target: PathBuf::from("../sibling/file"),
            metadata: value(b"x"),
        }];

        let manifest = FilesetManifest::construct(&links, RelativeSymlinkBehavior::Resolve);
        assert_eq!(
            Some(&PathBuf::from("fs/sibling/file")),
            manifest.entries().get(&rel("fs/sub/link"))
        );

        let ignored = FilesetManifest::construct(&links, RelativeSymlinkBehavior::Ignore);
        assert!(ignored.entries().is_empty());
    }

    #[test]
    fn mapping_skips_digestless_entries() {
        let fileset = Artifact::middleman(rel("out"), rel("fs"));
        let filesets = HashMap::from([(
            fileset,
            vec![
                FilesetOutputSymlink {
                    name: rel("gen/a"),
                    target: PathBuf::from("/exec/real/a"),
                    metadata: value(b"a"),
                },
                FilesetOutputSymlink {
                    name: rel("gen/dir"),
                    target: PathBuf::from("/exec/real/dir"),
                    metadata: FileValue::for_directory_with_mtime(0),
                },
            ],
        )]);

        let mapping = create_fileset_mapping(&filesets);
        assert_eq!(1, mapping.len());
        assert_eq!(Some(&value(b"a")), mapping.get(&rel("gen/a")));
    }
}
