/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashSet;
use dupe::Dupe;
use quarry_common::file_ops::FileDigest;
use quarry_common::file_ops::FileStat;
use quarry_common::file_ops::FileValue;
use quarry_common::file_ops::OutputPermissions;
use quarry_common::io::ActionIo;
use quarry_common::liveliness::LivelinessManager;
use quarry_core::fs::paths::ForwardRelativePath;
use quarry_core::fs::paths::ForwardRelativePathBuf;
use thiserror::Error;

use crate::artifact::ActionInput;
use crate::artifact::Artifact;
use crate::artifact::ArtifactKind;
use crate::artifact::ArtifactPathResolver;
use crate::entry::construct_file_value;
use crate::fileset::create_fileset_mapping;
use crate::fileset::FilesetOutputSymlink;
use crate::input::InputArtifactData;
use crate::output_store::OutputStore;
use crate::tree_builder::construct_tree_value_from_filesystem;
use crate::tree_builder::set_path_permissions_if_file;
use crate::tree_builder::TreeBuildContext;
use crate::tree_value::TreeValue;
use crate::tsgm::TimestampGranularityMonitor;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("tried to {0} outside of action execution")]
    NotInExecutionMode(String),
    #[error("already in execution mode")]
    AlreadyExecuting,
    #[error("{0} is not a declared output of this action")]
    NotADeclaredOutput(String),
    #[error("tree artifacts and their children must be injected via inject_tree: {0}")]
    TreeInjectedAsFile(String),
    #[error("{0} is not a tree artifact")]
    NotATreeArtifact(String),
    #[error("{0} is not a middleman artifact")]
    NotAMiddleman(String),
    #[error("{0} is a symlink")]
    UnexpectedSymlink(String),
    #[error(
        "archived representation presence mismatched for {0} \
         (archived tree artifacts enabled: {1})"
    )]
    ArchivedRepresentationMismatch(String, bool),
    #[error("{0} marked as omitted twice")]
    OmittedTwice(String),
}

/// If `value` represents an existing file, returns it as is, otherwise the
/// caller sees a not-found error rather than a sentinel.
fn check_exists(value: FileValue, artifact: &Artifact) -> anyhow::Result<FileValue> {
    if !value.exists() {
        return Err(MetadataError::NotFound(artifact.to_string()).into());
    }
    Ok(value)
}

fn check_tree_exists(value: TreeValue, artifact: &Artifact) -> anyhow::Result<TreeValue> {
    if !value.exists() {
        return Err(MetadataError::NotFound(artifact.to_string()).into());
    }
    Ok(value)
}

/// Allows the execution engine to obtain metadata about inputs and outputs
/// and to store metadata about an action's outputs, for the purpose of
/// constructing the action's execution value.
///
/// The handler can be in one of two modes. After construction, it acts as a
/// cache for input and output metadata while the action cache checker
/// determines whether the action needs to be executed. If it does,
/// [`prepare_for_action_execution`](Self::prepare_for_action_execution) is
/// called; this switches the handler to a mode where it accepts injected
/// output data, or otherwise obtains metadata from the filesystem. Freshly
/// created output files have their permissions set *before* statting them to
/// ensure that the stat's ctime is up to date.
///
/// After action execution, output metadata should be requested for each of
/// the action's outputs (except those marked omitted) to ensure that declared
/// outputs were in fact created and are valid.
pub struct ActionMetadataHandler {
    input_artifact_data: InputArtifactData,
    archived_tree_artifacts_enabled: bool,
    output_permissions: OutputPermissions,
    fileset_mapping: HashMap<ForwardRelativePathBuf, FileValue>,

    omitted_outputs: DashSet<Artifact>,
    outputs: HashSet<Artifact>,

    io: Arc<dyn ActionIo>,
    tsgm: Option<Arc<TimestampGranularityMonitor>>,
    resolver: ArtifactPathResolver,
    liveliness: Arc<dyn LivelinessManager>,

    execution_mode: AtomicBool,
    store: OutputStore,
}

impl ActionMetadataHandler {
    pub fn new(
        input_artifact_data: InputArtifactData,
        archived_tree_artifacts_enabled: bool,
        output_permissions: OutputPermissions,
        outputs: HashSet<Artifact>,
        io: Arc<dyn ActionIo>,
        tsgm: Option<Arc<TimestampGranularityMonitor>>,
        resolver: ArtifactPathResolver,
        expanded_filesets: &HashMap<Artifact, Vec<FilesetOutputSymlink>>,
        liveliness: Arc<dyn LivelinessManager>,
    ) -> ActionMetadataHandler {
        ActionMetadataHandler {
            input_artifact_data,
            archived_tree_artifacts_enabled,
            output_permissions,
            fileset_mapping: create_fileset_mapping(expanded_filesets),
            omitted_outputs: DashSet::new(),
            outputs,
            io,
            tsgm,
            resolver,
            liveliness,
            execution_mode: AtomicBool::new(false),
            store: OutputStore::new(),
        }
    }

    fn is_known_output(&self, artifact: &Artifact) -> bool {
        self.outputs.contains(artifact)
            || artifact
                .parent()
                .map_or(false, |parent| self.outputs.contains(parent))
    }

    fn check_execution_mode(&self, operation: impl FnOnce() -> String) -> anyhow::Result<()> {
        if !self.execution_mode.load(Ordering::Acquire) {
            return Err(MetadataError::NotInExecutionMode(operation()).into());
        }
        Ok(())
    }

    /// Pre-resolved metadata for a declared input. Never touches the
    /// filesystem.
    pub fn get_input_metadata(&self, input: &ActionInput) -> anyhow::Result<Option<FileValue>> {
        let artifact = match input {
            ActionInput::Artifact(artifact) => artifact,
            ActionInput::Path(path) => {
                // Non-artifact inputs come out of filesets. Keys under the
                // exec root are relativized; anything else is looked up
                // verbatim.
                let key = match self.resolver.exec_root().relativize(path) {
                    Ok(key) => key,
                    Err(..) => match ForwardRelativePath::new(path) {
                        Ok(key) => key.to_buf(),
                        Err(..) => return Ok(None),
                    },
                };
                return Ok(self.fileset_mapping.get(&key).cloned());
            }
        };

        match self.input_artifact_data.get(artifact) {
            Some(value) => check_exists(value.clone(), artifact).map(Some),
            None => Ok(None),
        }
    }

    /// The declared input living at `exec_path`, if any.
    pub fn input_by_exec_path(&self, exec_path: &ForwardRelativePath) -> Option<&Artifact> {
        self.input_artifact_data.get_by_exec_path(exec_path)
    }

    /// Metadata for a declared output, cached or discovered. Returns `None`
    /// for artifacts that are not declared outputs of this action.
    pub async fn get_output_metadata(
        &self,
        artifact: &Artifact,
    ) -> anyhow::Result<Option<FileValue>> {
        if !self.is_known_output(artifact) {
            return Ok(None);
        }

        if artifact.is_middleman_artifact() {
            // A middleman's data was either injected by the action cache
            // checker through set_digest_for_virtual_artifact, or it has the
            // default middleman value.
            if let Some(value) = self.store.get_artifact_data(artifact) {
                return check_exists(value, artifact).map(Some);
            }
            return Ok(Some(
                self.store
                    .or_insert_artifact_data(artifact, FileValue::Middleman),
            ));
        }

        if artifact.is_tree_artifact() {
            let tree = self.get_tree_artifact_value(artifact).await?;
            return Ok(Some(tree.metadata()));
        }

        if let ArtifactKind::TreeChild {
            parent,
            parent_relative,
        } = artifact.kind()
        {
            let tree = self.get_tree_artifact_value(parent).await?;
            let value = tree
                .child_value(parent_relative)
                .cloned()
                .unwrap_or(FileValue::Missing);
            return check_exists(value, artifact).map(Some);
        }

        if let Some(value) = self.store.get_artifact_data(artifact) {
            return check_exists(value, artifact).map(Some);
        }

        // No existing metadata; a spawn ran without injecting it, or a later
        // spawn is asking for an output of an earlier one, or this is the
        // post-execution pass over every declared output.

        // The value may use a contents proxy, which is based on ctime, so
        // permissions go on before the stat.
        if self.execution_mode.load(Ordering::Acquire) {
            set_path_permissions_if_file(
                &*self.io,
                &self.resolver.resolve(artifact),
                self.output_permissions.mode(),
            )?;
        }

        let value = construct_file_value(
            artifact,
            &self.resolver,
            &*self.io,
            None,
            None,
            self.tsgm.as_deref(),
        )?;
        self.store.put_artifact_data(artifact.dupe(), value.clone());
        check_exists(value, artifact).map(Some)
    }

    /// Stores a digest-only value for a middleman. Valid in either phase;
    /// this is the one write the cache-check phase is allowed.
    pub fn set_digest_for_virtual_artifact(
        &self,
        artifact: &Artifact,
        digest: Vec<u8>,
    ) -> anyhow::Result<()> {
        if !artifact.is_middleman_artifact() {
            return Err(MetadataError::NotAMiddleman(artifact.to_string()).into());
        }
        self.store
            .put_artifact_data(artifact.dupe(), FileValue::Proxy { digest });
        Ok(())
    }

    /// Aggregate metadata for a tree artifact, cached or built by walking the
    /// output directory.
    pub async fn get_tree_artifact_value(&self, artifact: &Artifact) -> anyhow::Result<TreeValue> {
        if !artifact.is_tree_artifact() {
            return Err(MetadataError::NotATreeArtifact(artifact.to_string()).into());
        }

        if let Some(value) = self.store.get_tree_data(artifact) {
            return check_tree_exists(value, artifact);
        }

        let ctx = TreeBuildContext {
            io: self.io.dupe(),
            resolver: self.resolver.clone(),
            tsgm: self.tsgm.clone(),
            liveliness: self.liveliness.dupe(),
            chmod: self
                .execution_mode
                .load(Ordering::Acquire)
                .then(|| self.output_permissions.mode()),
            archived_trees_enabled: self.archived_tree_artifacts_enabled,
        };
        let value = construct_tree_value_from_filesystem(&ctx, artifact).await?;
        self.store.put_tree_data(artifact.dupe(), value.dupe());
        check_tree_exists(value, artifact)
    }

    /// The children of a tree artifact, if its value is already cached. Pure
    /// lookup.
    pub fn get_tree_artifact_children(&self, tree: &Artifact) -> anyhow::Result<Vec<Artifact>> {
        if !tree.is_tree_artifact() {
            return Err(MetadataError::NotATreeArtifact(tree.to_string()).into());
        }
        Ok(self
            .store
            .get_tree_data(tree)
            .map(|value| value.children())
            .unwrap_or_default())
    }

    /// Builds a value for an output whose digest the executor already knows,
    /// reusing its stat instead of issuing a new one. Does not write to the
    /// store.
    pub fn construct_metadata_for_digest(
        &self,
        output: &Artifact,
        stat_no_follow: FileStat,
        digest: FileDigest,
    ) -> anyhow::Result<FileValue> {
        if output.is_symlink() {
            return Err(MetadataError::UnexpectedSymlink(output.to_string()).into());
        }
        self.check_execution_mode(|| format!("construct metadata for {}", output))?;

        // We already have a stat, so no need to call chmod.
        construct_file_value(
            output,
            &self.resolver,
            &*self.io,
            Some(stat_no_follow),
            Some(digest),
            self.tsgm.as_deref(),
        )
    }

    /// Stores executor-provided metadata for a plain output.
    pub fn inject_file(&self, output: &Artifact, value: FileValue) -> anyhow::Result<()> {
        self.check_execution_mode(|| format!("inject metadata for {}", output))?;
        if !self.is_known_output(output) {
            return Err(MetadataError::NotADeclaredOutput(output.to_string()).into());
        }
        if output.is_tree_artifact() || output.is_tree_child() {
            return Err(MetadataError::TreeInjectedAsFile(output.to_string()).into());
        }
        self.store.put_artifact_data(output.dupe(), value);
        Ok(())
    }

    /// Stores executor-provided metadata for a tree output.
    pub fn inject_tree(&self, output: &Artifact, tree: TreeValue) -> anyhow::Result<()> {
        self.check_execution_mode(|| format!("inject metadata for {}", output))?;
        if !self.is_known_output(output) {
            return Err(MetadataError::NotADeclaredOutput(output.to_string()).into());
        }
        if !output.is_tree_artifact() {
            return Err(MetadataError::NotATreeArtifact(output.to_string()).into());
        }
        if self.archived_tree_artifacts_enabled != tree.has_archived_representation() {
            return Err(MetadataError::ArchivedRepresentationMismatch(
                output.to_string(),
                self.archived_tree_artifacts_enabled,
            )
            .into());
        }
        self.store.put_tree_data(output.dupe(), tree);
        Ok(())
    }

    /// Records that the action chose not to produce an output. Tolerated
    /// multiple times for a tree artifact so that callers don't have to
    /// deduplicate when several of its children were omitted.
    pub fn mark_omitted(&self, output: &Artifact) -> anyhow::Result<()> {
        self.check_execution_mode(|| format!("mark {} omitted", output))?;
        let newly_omitted = self.omitted_outputs.insert(output.dupe());
        if output.is_tree_artifact() {
            if newly_omitted {
                self.store.put_tree_data(output.dupe(), TreeValue::Omitted);
            }
        } else {
            if !newly_omitted {
                return Err(MetadataError::OmittedTwice(output.to_string()).into());
            }
            self.store
                .put_artifact_data(output.dupe(), FileValue::Omitted);
        }
        Ok(())
    }

    pub fn artifact_omitted(&self, artifact: &Artifact) -> bool {
        self.omitted_outputs.contains(artifact)
    }

    /// Forgets everything recorded about the given outputs, so that a retry
    /// within the same action rediscovers them.
    pub fn reset_outputs<'a>(
        &self,
        outputs: impl IntoIterator<Item = &'a Artifact>,
    ) -> anyhow::Result<()> {
        self.check_execution_mode(|| "reset outputs".to_owned())?;
        for output in outputs {
            self.omitted_outputs.remove(output);
            self.store.remove(output);
        }
        Ok(())
    }

    /// Informs this handler that the action is about to be executed. Any
    /// stale metadata cached during action cache checking is cleared.
    pub fn prepare_for_action_execution(&self) -> anyhow::Result<()> {
        if self.execution_mode.swap(true, Ordering::SeqCst) {
            return Err(MetadataError::AlreadyExecuting.into());
        }
        self.store.clear();
        Ok(())
    }

    /// The store of metadata cached during this handler's lifetime; the
    /// executor promotes it into the action's execution value.
    pub fn output_store(&self) -> &OutputStore {
        &self.store
    }
}

impl fmt::Debug for ActionMetadataHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMetadataHandler")
            .field("outputs", &self.outputs.len())
            .field("artifact_data", &self.store.artifact_data_len())
            .field("tree_data", &self.store.tree_data_len())
            .field("input_artifact_data_size", &self.input_artifact_data.len())
            .finish()
    }
}
