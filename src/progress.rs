// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Progress reporting and per-request cancellation guarding.
//!
//! Progress is an explicit value object handed to the caller at each step,
//! never state mutated in place. The [`RequestGuard`] wraps the run's
//! cancellation token for one network request: cancellation propagates until
//! the request body has been fully transmitted, after which the outcome is
//! already in the server's hands and flipping to canceled would leave it
//! ambiguous — so the token is disarmed for that one request while its
//! progress callback keeps reporting bytes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Snapshot of sync progress, reported to the caller after every step and
/// during file transfers.
#[derive(Debug, Clone, Default)]
pub struct SyncProgress {
    /// File bytes uploaded so far across the whole run
    pub bytes_synced: u64,
    /// Total file bytes this run will upload
    pub bytes_total: u64,
    /// Groups fully synced so far
    pub groups_synced: usize,
    /// Total groups in this run
    pub groups_total: usize,
    /// Label of the unit currently being synced
    pub label: String,
    /// Bytes transferred of the current file, if one is uploading
    pub file_bytes_synced: u64,
    /// Size of the current file, if one is uploading
    pub file_bytes_total: u64,
}

impl SyncProgress {
    /// Fraction of groups synced, in `0.0..=1.0`.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.groups_total == 0 {
            1.0
        } else {
            self.groups_synced as f64 / self.groups_total as f64
        }
    }
}

/// Caller-facing progress callback.
pub type ProgressCallback = Arc<dyn Fn(&SyncProgress) + Send + Sync>;

/// Wire-level transfer callback: `(bytes_sent, bytes_total)` of one request
/// body. Invoked by the repository client as the upload proceeds.
pub type TransferCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Per-request cancellation guard.
///
/// Hands the client a request-scoped token that follows the run's token
/// until [`RequestGuard::transfer_callback`] observes the payload fully
/// transmitted, then suppresses cancellation for the remainder of the
/// request.
pub struct RequestGuard {
    request_token: CancellationToken,
    transmitted: Arc<AtomicBool>,
    // Cancelled on drop so the forwarder task does not outlive the request
    finished: CancellationToken,
}

impl RequestGuard {
    /// Create a guard linked to the run's cancellation token.
    ///
    /// Spawns a forwarder that cancels the request token when `outer` fires,
    /// unless the payload has already been fully transmitted by then.
    pub fn new(outer: &CancellationToken) -> Self {
        let request_token = CancellationToken::new();
        let transmitted = Arc::new(AtomicBool::new(false));
        let finished = CancellationToken::new();

        let outer = outer.clone();
        let forward_token = request_token.clone();
        let forward_transmitted = Arc::clone(&transmitted);
        let forward_finished = finished.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = outer.cancelled() => {
                    if !forward_transmitted.load(Ordering::Acquire) {
                        forward_token.cancel();
                    }
                }
                () = forward_finished.cancelled() => {}
            }
        });

        Self {
            request_token,
            transmitted,
            finished,
        }
    }

    /// Token to pass to the repository client for this request.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.request_token.clone()
    }

    /// True once the request body has been fully transmitted.
    #[must_use]
    pub fn is_transmitted(&self) -> bool {
        self.transmitted.load(Ordering::Acquire)
    }

    /// Wrap a transfer callback so full transmission disarms cancellation
    /// while bytes keep flowing to `inner`.
    #[must_use]
    pub fn transfer_callback(&self, inner: TransferCallback) -> TransferCallback {
        let transmitted = Arc::clone(&self.transmitted);
        Arc::new(move |sent, total| {
            if total > 0 && sent >= total {
                transmitted.store(true, Ordering::Release);
            }
            inner(sent, total);
        })
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.finished.cancel();
    }
}
