// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::similarity::{composite, merge_threshold};

/// Maximum todos tracked per session; the oldest by detection time is
/// evicted when the cap is exceeded.
pub const MAX_TODOS_PER_SESSION: usize = 50;

/// Todos without an update for this long are swept.
pub const TODO_EXPIRY_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    /// Progress rank. Merges keep the furthest-progressed status; output
    /// parsing alone never demotes a completed todo.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Stable content hash of the normalized text.
    pub id: u64,
    pub content: String,
    pub status: TodoStatus,
    pub priority: Option<Priority>,
    pub complexity: Option<Complexity>,
    pub estimated_minutes: Option<u32>,
    pub detected_at_ms: u64,
    pub updated_at_ms: u64,
}

impl TodoItem {
    pub fn new(content: String, status: TodoStatus, now_ms: u64) -> Self {
        let id = content_hash(&content);
        Self {
            id,
            content,
            status,
            priority: None,
            complexity: None,
            estimated_minutes: None,
            detected_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }
}

/// Fold internal whitespace, trim, and require at least 5 characters.
pub fn normalize(content: &str) -> Option<String> {
    let folded = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if folded.chars().count() < 5 {
        return None;
    }
    Some(folded)
}

/// Deterministic 64-bit hash of normalized content.
///
/// `DefaultHasher::new()` uses fixed keys, so ids are stable across
/// processes (unlike a `HashMap`'s per-instance `RandomState`).
pub fn content_hash(normalized: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

/// Bounded, insertion-ordered todo set with fuzzy deduplication.
#[derive(Debug)]
pub struct TodoStore {
    items: IndexMap<u64, TodoItem>,
    max: usize,
}

impl Default for TodoStore {
    fn default() -> Self {
        Self::new(MAX_TODOS_PER_SESSION)
    }
}

impl TodoStore {
    pub fn new(max: usize) -> Self {
        Self { items: IndexMap::new(), max }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> Vec<TodoItem> {
        self.items.values().cloned().collect()
    }

    pub fn get(&self, id: u64) -> Option<&TodoItem> {
        self.items.get(&id)
    }

    /// Insert or merge a detected todo. Returns `true` when the stored set
    /// changed (new item, status promotion, or content/time refresh).
    pub fn upsert(&mut self, incoming: TodoItem) -> bool {
        // Exact id match first, then a fuzzy scan.
        let merge_id = if self.items.contains_key(&incoming.id) {
            Some(incoming.id)
        } else {
            self.items
                .values()
                .find(|existing| {
                    composite(&existing.content, &incoming.content)
                        >= merge_threshold(&existing.content, &incoming.content)
                })
                .map(|existing| existing.id)
        };

        match merge_id {
            Some(id) => {
                let Some(existing) = self.items.get(&id) else { return false };
                let merged = merge(existing, &incoming);
                let changed = merged != *existing;
                if merged.id == id {
                    if changed {
                        self.items.insert(id, merged);
                    }
                } else {
                    // The incoming content won the merge: re-key under the
                    // new content hash so id stays the hash of the content.
                    self.items.shift_remove(&id);
                    self.items.insert(merged.id, merged);
                }
                changed
            }
            None => {
                self.items.insert(incoming.id, incoming);
                self.evict_oldest();
                true
            }
        }
    }

    /// Promote the status of the todo registered under a task number's
    /// content, if present.
    pub fn set_status(&mut self, id: u64, status: TodoStatus, now_ms: u64) -> bool {
        let Some(item) = self.items.get_mut(&id) else { return false };
        if status.rank() <= item.status.rank() {
            return false;
        }
        item.status = status;
        item.updated_at_ms = now_ms;
        true
    }

    /// Mark every tracked todo completed (completion phrase observed).
    pub fn mark_all_completed(&mut self, now_ms: u64) -> bool {
        let mut changed = false;
        for item in self.items.values_mut() {
            if item.status != TodoStatus::Completed {
                item.status = TodoStatus::Completed;
                item.updated_at_ms = now_ms;
                changed = true;
            }
        }
        changed
    }

    /// Count of todos not yet completed.
    pub fn open_count(&self) -> usize {
        self.items.values().filter(|t| t.status != TodoStatus::Completed).count()
    }

    /// First non-completed todo in detection order (ralph-todo injection).
    pub fn next_open(&self) -> Option<&TodoItem> {
        self.items.values().find(|t| t.status != TodoStatus::Completed)
    }

    /// Drop todos that have not been updated for [`TODO_EXPIRY_MS`].
    pub fn expire(&mut self, now_ms: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|_, t| now_ms.saturating_sub(t.updated_at_ms) < TODO_EXPIRY_MS);
        self.items.len() != before
    }

    /// Replace the whole set (authoritative plan file).
    pub fn replace_all(&mut self, todos: Vec<TodoItem>) {
        self.items.clear();
        for t in todos {
            self.items.insert(t.id, t);
        }
        self.evict_oldest();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn evict_oldest(&mut self) {
        while self.items.len() > self.max {
            let Some(oldest) = self
                .items
                .values()
                .min_by_key(|t| t.detected_at_ms)
                .map(|t| t.id)
            else {
                break;
            };
            self.items.shift_remove(&oldest);
        }
    }
}

/// Merge two matching todos: longer content wins, newer detection time
/// wins, and status is monotonically non-decreasing.
///
/// Symmetric: `merge(a, b) == merge(b, a)`. The content winner is picked by
/// length with a lexicographic tie-break, the id is rehashed from the
/// winning content, and the annotations follow the winner (falling back to
/// the other item) so no field depends on argument order.
pub fn merge(a: &TodoItem, b: &TodoItem) -> TodoItem {
    let (winner, other) = {
        let a_key = (a.content.chars().count(), a.content.as_str());
        let b_key = (b.content.chars().count(), b.content.as_str());
        if b_key > a_key {
            (b, a)
        } else {
            (a, b)
        }
    };
    let content = winner.content.clone();
    let status = if a.status.rank() >= b.status.rank() { a.status } else { b.status };
    TodoItem {
        id: content_hash(&content),
        content,
        status,
        priority: winner.priority.or(other.priority),
        complexity: winner.complexity.or(other.complexity),
        estimated_minutes: winner.estimated_minutes.or(other.estimated_minutes),
        detected_at_ms: a.detected_at_ms.max(b.detected_at_ms),
        updated_at_ms: a.updated_at_ms.max(b.updated_at_ms),
    }
}

#[cfg(test)]
#[path = "todo_tests.rs"]
mod tests;
