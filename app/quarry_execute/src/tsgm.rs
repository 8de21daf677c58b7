/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// Records the newest file timestamp the build depended on. Filesystems only
/// resolve timestamps to some granularity; a command that finishes within the
/// same granularity window as a file it read could miss a subsequent
/// modification, so the engine waits this monitor out before completing.
pub struct TimestampGranularityMonitor {
    /// Milliseconds since the epoch; i64::MIN when nothing was recorded.
    newest_dependence: AtomicI64,
}

impl Default for TimestampGranularityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampGranularityMonitor {
    pub fn new() -> TimestampGranularityMonitor {
        TimestampGranularityMonitor {
            newest_dependence: AtomicI64::new(i64::MIN),
        }
    }

    pub fn notify_dependence_on_file_time(&self, time_millis: i64) {
        self.newest_dependence
            .fetch_max(time_millis, Ordering::Relaxed);
    }

    pub fn newest_dependence(&self) -> Option<i64> {
        match self.newest_dependence.load(Ordering::Relaxed) {
            i64::MIN => None,
            t => Some(t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_newest_time() {
        let tsgm = TimestampGranularityMonitor::new();
        assert_eq!(None, tsgm.newest_dependence());

        tsgm.notify_dependence_on_file_time(10);
        tsgm.notify_dependence_on_file_time(5);
        assert_eq!(Some(10), tsgm.newest_dependence());
    }
}
