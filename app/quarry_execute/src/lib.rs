/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The per-action metadata layer. One [`handler::ActionMetadataHandler`] is
//! created per in-flight action; it serves input metadata to the action cache
//! checker, then (if the action executes) collects output metadata, either
//! injected by the executor or discovered by statting and digesting what the
//! action produced.

pub mod artifact;
pub mod entry;
pub mod fileset;
pub mod handler;
pub mod input;
pub mod output_store;
mod tree_builder;
pub mod tree_value;
pub mod tsgm;
