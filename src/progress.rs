// Copyright 2026 Gatecrash Contributors
// SPDX-License-Identifier: Apache-2.0

//! Progress event types and broadcast channel for run telemetry.
//!
//! The download manager emits `ProgressEvent`s during a run, which flow
//! through a `tokio::sync::broadcast` channel to all subscribers. When no
//! subscriber exists, events are silently dropped. Within a run the
//! `fraction` field never decreases; the manager blends whole-item progress
//! with intra-item sub-resource progress for smoother reporting.

use serde::{Deserialize, Serialize};

/// A progress event emitted during an acquisition run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Human-readable description of the current stage.
    pub message: String,
    /// Overall completion, 0.0..=1.0, non-decreasing within a run.
    pub fraction: f32,
    /// 1-based count of the item being processed within this run, if any.
    pub item_ordinal: Option<usize>,
    /// 0-based position of the current item in the full sorted catalog.
    pub item_index: Option<usize>,
    /// Total number of items in the catalog (including already-acquired).
    pub item_total: Option<usize>,
}

impl ProgressEvent {
    /// A run-level event with no current item.
    pub fn stage(message: impl Into<String>, fraction: f32, item_total: Option<usize>) -> Self {
        Self {
            message: message.into(),
            fraction,
            item_ordinal: None,
            item_index: None,
            item_total,
        }
    }
}

/// Sender handle for emitting progress events.
///
/// Backed by a `tokio::sync::broadcast` channel so multiple listeners can
/// subscribe independently. When no listeners exist, `send()` returns an
/// error which we silently ignore.
pub type ProgressSender = tokio::sync::broadcast::Sender<ProgressEvent>;

/// Receiver handle for consuming progress events.
pub type ProgressReceiver = tokio::sync::broadcast::Receiver<ProgressEvent>;

/// Create a new progress broadcast channel with a bounded buffer.
///
/// 256 events covers a typical run: a handful of stage events plus one
/// event per sub-resource.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(256)
}

/// Emit a progress event, silently ignoring send errors (which occur when
/// no receivers are listening). The caller is responsible for keeping
/// fractions non-decreasing.
pub fn emit(tx: &Option<ProgressSender>, event: ProgressEvent) {
    if let Some(sender) = tx {
        let _ = sender.send(event);
    }
}
