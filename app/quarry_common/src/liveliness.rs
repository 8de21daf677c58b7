/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Cooperative cancellation for blocking metadata work. The handler owns one
//! manager per action; the parallel tree walk polls it between directories
//! (see `FsActionIo::visit_tree`) and abandons the walk with an interruption
//! error, rather than a partial result, once it reports dead.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

#[async_trait]
pub trait LivelinessManager: Send + Sync {
    /// Pending while the work may keep going. Ready once it must stop.
    async fn while_alive(&self);
}

impl dyn LivelinessManager {
    /// One-shot poll of `while_alive`, for loops that have work to do and
    /// only want to know whether to schedule more of it.
    pub async fn is_alive(&self) -> bool {
        futures::poll!(self.while_alive()).is_pending()
    }
}

/// Keeps the paired manager alive for as long as it exists. The action
/// executor drops it to fail in-flight walks over.
pub struct LivelinessGuard {
    // Holds the sending side open; dropping it is the cancellation signal.
    _alive: watch::Sender<()>,
}

impl LivelinessGuard {
    pub fn create() -> (Arc<dyn LivelinessManager>, LivelinessGuard) {
        let (tx, rx) = watch::channel(());
        (Arc::new(rx) as _, LivelinessGuard { _alive: tx })
    }
}

#[async_trait]
impl LivelinessManager for watch::Receiver<()> {
    async fn while_alive(&self) {
        // Nothing is ever sent on the channel, so `changed` stays pending
        // until the guard drops the sender.
        let mut rx = self.clone();
        let _ = rx.changed().await;
    }
}

/// Never cancels. For cache checking and tests, where nothing races the
/// walk.
pub struct NoopLivelinessManager;

impl NoopLivelinessManager {
    pub fn create() -> Arc<dyn LivelinessManager> {
        Arc::new(Self) as _
    }
}

#[async_trait]
impl LivelinessManager for NoopLivelinessManager {
    async fn while_alive(&self) {
        futures::future::pending().await
    }
}
