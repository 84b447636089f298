// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event fanout: per-session terminal batching with DEC-2026 framing, SSE
//! broadcast with per-client backpressure skip, and TTL-cached snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use crate::event::{names, Envelope};

/// Pending bytes above this flush immediately.
pub const MAX_PENDING_BATCH: usize = 32 * 1024;
/// How long an unclosed synchronized-update block is held before being
/// discarded.
pub const SYNC_HOLD_MS: u64 = 50;
/// Per-client queue depth; a full queue marks the client backpressured.
pub const CLIENT_QUEUE_DEPTH: usize = 256;
/// TTL for the `/sessions` and `/status` snapshot caches.
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(1);

const DEC_BEGIN: &[u8] = b"\x1b[?2026h";
const DEC_END: &[u8] = b"\x1b[?2026l";

struct Client {
    id: u64,
    tx: mpsc::Sender<Envelope>,
    needs_refresh: bool,
}

#[derive(Default)]
struct Batch {
    pending: Vec<u8>,
    interval_ms: u64,
    last_push: Option<Instant>,
    scheduled: bool,
    generation: u64,
    hold_since: Option<Instant>,
}

/// Snapshot cache with a short TTL, invalidated by `session:*` /
/// `respawn:*` events (prefix match; exact-match is a known footgun).
pub struct SnapshotCache {
    slot: Mutex<Option<(Instant, serde_json::Value)>>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self { slot: Mutex::new(None), ttl }
    }

    pub fn get_or_compute(&self, compute: impl FnOnce() -> serde_json::Value) -> serde_json::Value {
        let mut slot = self.slot.lock();
        if let Some((at, value)) = slot.as_ref() {
            if at.elapsed() < self.ttl {
                return value.clone();
            }
        }
        let value = compute();
        *slot = Some((Instant::now(), value.clone()));
        value
    }

    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }
}

pub struct EventFanout {
    clients: Mutex<Vec<Client>>,
    batches: Mutex<HashMap<String, Batch>>,
    next_client_id: AtomicU64,
    pub sessions_cache: SnapshotCache,
    pub status_cache: SnapshotCache,
}

impl EventFanout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(Vec::new()),
            batches: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            sessions_cache: SnapshotCache::new(SNAPSHOT_TTL),
            status_cache: SnapshotCache::new(SNAPSHOT_TTL),
        })
    }

    /// Register a client queue. The caller owns the receiver; dropping it
    /// unregisters the client on the next publish.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().push(Client { id, tx, needs_refresh: false });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.clients.lock().retain(|c| c.id != id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Broadcast one event to every client, best-effort.
    ///
    /// A backpressured client is skipped for the current event; once its
    /// queue drains it receives exactly one `session:needsRefresh` and then
    /// the subsequent event cycle.
    pub fn publish(&self, envelope: Envelope) {
        if envelope.event.starts_with("session:") || envelope.event.starts_with("respawn:") {
            self.sessions_cache.invalidate();
            self.status_cache.invalidate();
        }

        let mut clients = self.clients.lock();
        clients.retain(|c| !c.tx.is_closed());
        for client in clients.iter_mut() {
            if client.needs_refresh {
                let refresh = Envelope::new(names::SESSION_NEEDS_REFRESH, json!({}));
                if client.tx.try_send(refresh).is_ok() {
                    client.needs_refresh = false;
                }
                // The current event is skipped either way; the client
                // resynchronizes from the snapshot.
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = client.tx.try_send(envelope.clone()) {
                client.needs_refresh = true;
            }
        }
    }

    /// Queue raw terminal bytes for a session with adaptive batching.
    pub fn push_terminal(self: &Arc<Self>, session_id: &str, bytes: &[u8]) {
        let mut batches = self.batches.lock();
        let batch = batches.entry(session_id.to_owned()).or_default();

        // Adaptive window from inter-event spacing: the faster events
        // arrive, the longer the coalescing window.
        let now = Instant::now();
        let spacing = batch.last_push.map(|t| now.duration_since(t));
        batch.last_push = Some(now);
        batch.interval_ms = match spacing {
            Some(d) if d < Duration::from_millis(8) => 50,
            Some(d) if d < Duration::from_millis(25) => 32,
            _ => 16,
        };

        batch.pending.extend_from_slice(bytes);

        if batch.pending.len() >= MAX_PENDING_BATCH {
            batch.generation += 1;
            batch.scheduled = false;
            Self::flush_batch(self, session_id, batch);
            return;
        }

        if !batch.scheduled {
            batch.scheduled = true;
            batch.generation += 1;
            let generation = batch.generation;
            let delay = Duration::from_millis(batch.interval_ms);
            let fanout = Arc::clone(self);
            let session_id = session_id.to_owned();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                fanout.flush_due(&session_id, generation);
            });
        }
    }

    /// Flush whatever is pending for a session (used on session teardown).
    pub fn flush_session(self: &Arc<Self>, session_id: &str) {
        let mut batches = self.batches.lock();
        if let Some(batch) = batches.get_mut(session_id) {
            batch.generation += 1;
            batch.scheduled = false;
            batch.hold_since = Some(Instant::now() - Duration::from_millis(SYNC_HOLD_MS + 1));
            Self::flush_batch(self, session_id, batch);
        }
        batches.remove(session_id);
    }

    fn flush_due(self: &Arc<Self>, session_id: &str, generation: u64) {
        let mut batches = self.batches.lock();
        let Some(batch) = batches.get_mut(session_id) else { return };
        if batch.generation != generation {
            return;
        }
        batch.scheduled = false;
        Self::flush_batch(self, session_id, batch);
    }

    fn flush_batch(fanout: &Arc<Self>, session_id: &str, batch: &mut Batch) {
        if batch.pending.is_empty() {
            return;
        }

        let flush_upto = match find_unclosed_sync_block(&batch.pending) {
            None => {
                batch.hold_since = None;
                batch.pending.len()
            }
            Some(idx) => {
                let held_for = batch.hold_since.get_or_insert_with(Instant::now).elapsed();
                if held_for >= Duration::from_millis(SYNC_HOLD_MS) {
                    // The closer never arrived: discard the incomplete block.
                    batch.pending.truncate(idx);
                    batch.hold_since = None;
                    batch.pending.len()
                } else {
                    // Flush the closed prefix, hold the rest briefly.
                    if !batch.scheduled {
                        batch.scheduled = true;
                        batch.generation += 1;
                        let generation = batch.generation;
                        let fanout = Arc::clone(fanout);
                        let session_id = session_id.to_owned();
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(SYNC_HOLD_MS)).await;
                            fanout.flush_due(&session_id, generation);
                        });
                    }
                    idx
                }
            }
        };

        if flush_upto == 0 {
            return;
        }
        let chunk: Vec<u8> = batch.pending.drain(..flush_upto).collect();

        // Wrap in a DEC-2026 synchronized-update pair; receivers that don't
        // understand the markers pass them through harmlessly.
        let mut framed = Vec::with_capacity(chunk.len() + DEC_BEGIN.len() + DEC_END.len());
        framed.extend_from_slice(DEC_BEGIN);
        framed.extend_from_slice(&chunk);
        framed.extend_from_slice(DEC_END);

        let data = base64::engine::general_purpose::STANDARD.encode(&framed);
        fanout.publish(Envelope::new(
            names::SESSION_OUTPUT,
            json!({ "sessionId": session_id, "data": data }),
        ));
    }
}

/// Byte offset of the last DEC-2026 opener with no closer after it, if any.
fn find_unclosed_sync_block(pending: &[u8]) -> Option<usize> {
    let begin = rfind(pending, DEC_BEGIN)?;
    match rfind(pending, DEC_END) {
        Some(end) if end > begin => None,
        _ => Some(begin),
    }
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).rev().find(|&i| &haystack[i..i + needle.len()] == needle)
}

#[cfg(test)]
#[path = "fanout_tests.rs"]
mod tests;
