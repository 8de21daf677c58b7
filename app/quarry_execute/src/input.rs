/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::HashMap;

use dupe::Dupe;
use quarry_common::file_ops::FileValue;
use quarry_core::fs::paths::ForwardRelativePath;
use quarry_core::fs::paths::ForwardRelativePathBuf;

use crate::artifact::Artifact;

/// Pre-resolved metadata for an action's declared inputs. Read-only for the
/// lifetime of the handler.
pub struct InputArtifactData {
    by_artifact: HashMap<Artifact, FileValue>,
    by_exec_path: HashMap<ForwardRelativePathBuf, Artifact>,
}

impl InputArtifactData {
    pub fn new(inputs: impl IntoIterator<Item = (Artifact, FileValue)>) -> InputArtifactData {
        let by_artifact: HashMap<Artifact, FileValue> = inputs.into_iter().collect();
        let by_exec_path = by_artifact
            .keys()
            .map(|a| (a.exec_path().to_buf(), a.dupe()))
            .collect();
        InputArtifactData {
            by_artifact,
            by_exec_path,
        }
    }

    pub fn get(&self, artifact: &Artifact) -> Option<&FileValue> {
        self.by_artifact.get(artifact)
    }

    pub fn get_by_exec_path(&self, exec_path: &ForwardRelativePath) -> Option<&Artifact> {
        self.by_exec_path.get(exec_path)
    }

    pub fn len(&self) -> usize {
        self.by_artifact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_artifact.is_empty()
    }
}
