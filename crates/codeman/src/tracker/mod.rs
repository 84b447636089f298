// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ralph tracker: a streaming parser over stripped terminal output that
//! reconstructs the agent's loop counter, task list, completion signals,
//! and scripted status blocks.
//!
//! The tracker is a pure push-style parser: the session task calls
//! [`RalphTracker::feed`] with each chunk and routes the returned events in
//! order. Chunk N is fully processed before chunk N+1; all mutable parse
//! state is owned by one tracker instance.

pub mod patterns;
pub mod phrase;
pub mod planfile;
pub mod similarity;
pub mod status_block;
pub mod todo;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use patterns::Patterns;
use phrase::{validate_phrase, PhraseHit, PhraseTracker};
use status_block::{CumulativeStats, StatusBlock, StatusBlockParser};
use todo::{normalize, Complexity, Priority, TodoItem, TodoStatus, TodoStore};

/// Line accumulator cap; halved when exceeded.
pub const MAX_LINE_ACCUMULATOR: usize = 256 * 1024;
/// Partial `<promise>` tag held across chunks at most this long.
pub const MAX_PARTIAL_TAG: usize = 256;
/// Task-number map cap; lowest numbers are dropped first.
pub const MAX_TASK_NUMBERS: usize = 100;
/// Debounce window for `LoopUpdate` / `TodoUpdate` emissions.
pub const DEBOUNCE_MS: u64 = 50;
/// Throttled cleanup sweep interval.
pub const CLEANUP_INTERVAL_MS: u64 = 30_000;
/// Loop-active silence that triggers a stall warning.
pub const STALL_AFTER_MS: u64 = 120_000;

/// Announcement lines longer than this are ignored.
const MAX_ANNOUNCEMENT_LEN: usize = 100;

/// Snapshot of the tracked loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub enabled: bool,
    pub active: bool,
    pub cycles: u32,
    pub max_iterations: Option<u32>,
    pub completion_phrase: Option<String>,
    pub alternate_phrases: Vec<String>,
    pub last_activity_ms: u64,
    pub last_confidence: f64,
}

/// Events emitted by the tracker, routed by the session task.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Enabled,
    LoopUpdate(LoopState),
    TodoUpdate(Vec<TodoItem>),
    CompletionDetected { phrase: String },
    StatusBlockDetected(StatusBlock),
    /// English completion sentence counted by the exit gate.
    CompletionIndicator { line: String },
    PhraseValidationWarning { phrase: String, suggestion: String },
    StallWarning { inactive_ms: u64 },
}

/// Cross-cutting read of the tracker state (serialized to clients).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphSnapshot {
    #[serde(rename = "loop")]
    pub loop_state: LoopState,
    pub todos: Vec<TodoItem>,
    pub cumulative: CumulativeStats,
}

pub struct RalphTracker {
    patterns: Patterns,
    enabled: bool,
    auto_enable: bool,

    active: bool,
    cycles: u32,
    max_iterations: Option<u32>,
    last_activity_ms: u64,
    last_confidence: f64,

    phrases: PhraseTracker,
    todos: TodoStore,
    status: StatusBlockParser,
    task_names: HashMap<u32, String>,
    plan_authoritative: bool,

    acc: String,

    loop_dirty: bool,
    todo_dirty: bool,
    last_loop_emit_ms: u64,
    last_todo_emit_ms: u64,
    last_cleanup_ms: u64,
    stall_warned: bool,
}

impl RalphTracker {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            patterns: Patterns::compile()?,
            enabled: false,
            auto_enable: true,
            active: false,
            cycles: 0,
            max_iterations: None,
            last_activity_ms: 0,
            last_confidence: 0.0,
            phrases: PhraseTracker::new(),
            todos: TodoStore::default(),
            status: StatusBlockParser::new(),
            task_names: HashMap::new(),
            plan_authoritative: false,
            acc: String::new(),
            loop_dirty: false,
            todo_dirty: false,
            last_loop_emit_ms: 0,
            last_todo_emit_ms: 0,
            last_cleanup_ms: 0,
            stall_warned: false,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_auto_enable(&mut self, allowed: bool) {
        self.auto_enable = allowed;
    }

    pub fn set_loop_active(&mut self, active: bool) {
        if self.active != active {
            self.active = active;
            self.loop_dirty = true;
        }
    }

    /// Configure the primary completion phrase and iteration cap.
    pub fn configure(&mut self, completion_phrase: Option<String>, max_iterations: Option<u32>) {
        if let Some(phrase) = completion_phrase {
            self.phrases.set_expected(phrase);
        }
        if max_iterations.is_some() {
            self.max_iterations = max_iterations;
        }
        self.loop_dirty = true;
    }

    pub fn add_alternate_phrase(&mut self, phrase: String) {
        self.phrases.add_alternate(phrase);
        self.loop_dirty = true;
    }

    pub fn remove_alternate_phrase(&mut self, phrase: &str) {
        self.phrases.remove_alternate(phrase);
        self.loop_dirty = true;
    }

    /// Clear todos and occurrence state; the loop configuration survives.
    pub fn soft_reset(&mut self) {
        self.todos.clear();
        self.phrases.reset();
        self.task_names.clear();
        self.active = false;
        self.cycles = 0;
        self.last_confidence = 0.0;
        self.loop_dirty = true;
        self.todo_dirty = true;
    }

    /// Apply an authoritative plan-file snapshot. `None` means the plan file
    /// disappeared and output-based detection resumes.
    pub fn set_plan_todos(&mut self, todos: Option<Vec<TodoItem>>) {
        match todos {
            Some(todos) => {
                self.plan_authoritative = true;
                self.todos.replace_all(todos);
            }
            None => {
                self.plan_authoritative = false;
            }
        }
        self.todo_dirty = true;
    }

    pub fn snapshot(&self) -> RalphSnapshot {
        RalphSnapshot {
            loop_state: self.loop_state(),
            todos: self.todos.items(),
            cumulative: self.status.cumulative,
        }
    }

    pub fn loop_state(&self) -> LoopState {
        LoopState {
            enabled: self.enabled,
            active: self.active,
            cycles: self.cycles,
            max_iterations: self.max_iterations,
            completion_phrase: self.phrases.expected().map(str::to_owned),
            alternate_phrases: self.phrases.alternates().to_vec(),
            last_activity_ms: self.last_activity_ms,
            last_confidence: self.last_confidence,
        }
    }

    /// First open todo, for ralph-todo prompt selection.
    pub fn next_open_todo(&self) -> Option<TodoItem> {
        self.todos.next_open().cloned()
    }

    /// Feed one chunk of stripped terminal text.
    pub fn feed(&mut self, text: &str, now_ms: u64) -> Vec<TrackerEvent> {
        let mut out = Vec::new();

        if !self.enabled {
            if self.auto_enable
                && patterns::auto_enable_prefilter(text)
                && self.patterns.auto_enable.iter().any(|r| r.is_match(text))
            {
                self.enabled = true;
                self.loop_dirty = true;
                out.push(TrackerEvent::Enabled);
            } else {
                return out;
            }
        }

        self.acc.push_str(text);
        self.cap_accumulator();

        while let Some(pos) = self.acc.find('\n') {
            let line: String = self.acc.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.process_line(line, now_ms, &mut out);
        }

        // Partial promise tag held across chunks is bounded; when the closer
        // has not arrived within the budget the buffered tag is discarded.
        if let Some(idx) = self.acc.find("<promise") {
            if self.acc.len() - idx > MAX_PARTIAL_TAG {
                self.acc.truncate(idx);
            }
        }

        self.maybe_cleanup(now_ms);
        self.drain_due(now_ms, &mut out);
        out
    }

    /// Periodic tick from the owning session: flushes due debounced events,
    /// runs the throttled sweep, and raises stall warnings.
    pub fn poll(&mut self, now_ms: u64) -> Vec<TrackerEvent> {
        let mut out = Vec::new();
        if self.active
            && !self.stall_warned
            && self.last_activity_ms > 0
            && now_ms.saturating_sub(self.last_activity_ms) >= STALL_AFTER_MS
        {
            self.stall_warned = true;
            out.push(TrackerEvent::StallWarning {
                inactive_ms: now_ms.saturating_sub(self.last_activity_ms),
            });
        }
        self.maybe_cleanup(now_ms);
        self.drain_due(now_ms, &mut out);
        out
    }

    /// Emit every pending debounced event immediately.
    ///
    /// Must be called on shutdown and before cross-cutting reads so no
    /// emission is swallowed by the debounce window.
    pub fn flush_pending_events(&mut self) -> Vec<TrackerEvent> {
        let mut out = Vec::new();
        if self.loop_dirty {
            self.loop_dirty = false;
            out.push(TrackerEvent::LoopUpdate(self.loop_state()));
        }
        if self.todo_dirty {
            self.todo_dirty = false;
            out.push(TrackerEvent::TodoUpdate(self.todos.items()));
        }
        out
    }

    fn process_line(&mut self, line: &str, now_ms: u64, out: &mut Vec<TrackerEvent>) {
        self.last_activity_ms = now_ms;
        self.stall_warned = false;

        let (block, in_block) = self.status.on_line(line);
        if let Some(block) = block {
            self.loop_dirty = true;
            out.push(TrackerEvent::StatusBlockDetected(block));
        }
        if in_block || self.status.in_block() {
            return;
        }

        if let Some(caps) = self.patterns.iteration.captures(line) {
            if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                if n > self.cycles {
                    self.cycles = n;
                    self.loop_dirty = true;
                }
            }
            if let Some(max) = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()) {
                self.max_iterations = Some(max);
            }
            if !self.active {
                self.active = true;
                self.loop_dirty = true;
            }
        }

        let tags: Vec<String> = self
            .patterns
            .promise_tag
            .captures_iter(line)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_owned())
            .collect();
        let had_tag = !tags.is_empty();
        for phrase in tags {
            match self.phrases.on_tagged(&phrase, self.active) {
                PhraseHit::Registered(phrase) => {
                    self.loop_dirty = true;
                    if self.phrases.first_validation(&phrase) {
                        if let Some(suggestion) = validate_phrase(&phrase) {
                            out.push(TrackerEvent::PhraseValidationWarning { phrase, suggestion });
                        }
                    }
                }
                PhraseHit::Completed(phrase) => self.complete(phrase, now_ms, out),
                PhraseHit::None => {}
            }
        }

        let prompt_context = patterns::is_prompt_context(line);
        if !had_tag && !prompt_context {
            if let PhraseHit::Completed(phrase) = self.phrases.on_bare_line(line, self.active) {
                self.complete(phrase, now_ms, out);
            }
        }

        if !prompt_context && patterns::is_completion_sentence(line) {
            out.push(TrackerEvent::CompletionIndicator { line: line.trim().to_owned() });
        }

        self.detect_announcement(line, prompt_context, now_ms);

        if !self.plan_authoritative
            && !patterns::is_tool_invocation(line)
            && !patterns::is_narrator_line(line)
        {
            self.detect_todo(line, now_ms);
        }
    }

    /// "All tasks complete" style announcement: single line, bounded length,
    /// at least one tracked todo, explicit count within ±2 of the tracked
    /// count.
    fn detect_announcement(&mut self, line: &str, prompt_context: bool, now_ms: u64) {
        if prompt_context || line.chars().count() > MAX_ANNOUNCEMENT_LEN || self.todos.is_empty() {
            return;
        }
        let Some(caps) = self.patterns.all_complete.captures(line.trim()) else { return };
        if let Some(count) = caps.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) {
            let tracked = self.todos.len() as i64;
            if (count - tracked).abs() > 2 {
                return;
            }
        }
        if self.todos.mark_all_completed(now_ms) {
            self.todo_dirty = true;
        }
    }

    fn complete(&mut self, phrase: String, now_ms: u64, out: &mut Vec<TrackerEvent>) {
        if self.todos.mark_all_completed(now_ms) {
            self.todo_dirty = true;
        }
        self.active = false;
        self.last_confidence = 1.0;
        self.loop_dirty = true;
        out.push(TrackerEvent::CompletionDetected { phrase });
    }

    /// Todo surface syntaxes, evaluated in order: checkbox → indicator-icon
    /// → parenthesized-status → native-icon → checkmark family.
    fn detect_todo(&mut self, line: &str, now_ms: u64) {
        if let Some(caps) = self.patterns.checkbox.captures(line) {
            let status = match caps.get(1).map(|m| m.as_str()) {
                Some("x") | Some("X") => TodoStatus::Completed,
                Some("~") | Some("-") => TodoStatus::InProgress,
                _ => TodoStatus::Pending,
            };
            let content = caps.get(2).map(|m| m.as_str().to_owned());
            self.register_todo(content, status, now_ms);
            return;
        }

        if let Some(caps) = self.patterns.indicator_icon.captures(line) {
            let status = match caps.get(1).map(|m| m.as_str()) {
                Some("\u{2612}") => TodoStatus::Completed,
                Some("\u{25d0}") => TodoStatus::InProgress,
                _ => TodoStatus::Pending,
            };
            let content = caps.get(2).map(|m| m.as_str().to_owned());
            self.register_todo(content, status, now_ms);
            return;
        }

        if let Some(caps) = self.patterns.paren_status.captures(line) {
            let status = match caps.get(2).map(|m| m.as_str().to_lowercase()) {
                Some(s) if s.starts_with("complete") || s == "done" => TodoStatus::Completed,
                Some(s) if s.starts_with("in") => TodoStatus::InProgress,
                _ => TodoStatus::Pending,
            };
            let content = caps.get(1).map(|m| m.as_str().to_owned());
            self.register_todo(content, status, now_ms);
            return;
        }

        if let Some(caps) = self.patterns.native_icon.captures(line) {
            let status = match caps.get(1).map(|m| m.as_str()) {
                Some("\u{25cf}") => TodoStatus::Completed,
                Some("\u{25c9}") => TodoStatus::InProgress,
                _ => TodoStatus::Pending,
            };
            let content = caps.get(2).map(|m| m.as_str().to_owned());
            self.register_todo(content, status, now_ms);
            return;
        }

        // Checkmark family: numbered-task lifecycle lines first, then plain
        // checkmark lines.
        if let Some(caps) = self.patterns.task_created.captures(line) {
            let number = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let content = caps.get(2).map(|m| m.as_str().to_owned());
            if let (Some(number), Some(content)) = (number, content) {
                if let Some(normalized) = normalize(&content) {
                    self.task_names.insert(number, normalized.clone());
                    self.cap_task_names();
                    self.register_todo(Some(normalized), TodoStatus::Pending, now_ms);
                }
            }
            return;
        }

        if let Some(caps) = self.patterns.task_updated.captures(line) {
            let number = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let status = match caps.get(2).map(|m| m.as_str().trim().to_lowercase()) {
                Some(s) if s.starts_with("complete") || s == "done" => TodoStatus::Completed,
                Some(s) if s.starts_with("in") => TodoStatus::InProgress,
                _ => TodoStatus::Pending,
            };
            if let Some(content) = number.and_then(|n| self.task_names.get(&n)).cloned() {
                let id = todo::content_hash(&content);
                if self.todos.set_status(id, status, now_ms) {
                    self.todo_dirty = true;
                }
            }
            return;
        }

        if let Some(caps) = self.patterns.checkmark.captures(line) {
            let status = match caps.get(1).map(|m| m.as_str()) {
                Some("\u{2717}") => TodoStatus::Pending,
                _ => TodoStatus::Completed,
            };
            let content = caps.get(2).map(|m| m.as_str().to_owned());
            self.register_todo(content, status, now_ms);
        }
    }

    fn register_todo(&mut self, content: Option<String>, status: TodoStatus, now_ms: u64) {
        let Some(content) = content else { return };
        let Some(normalized) = normalize(&content) else { return };

        let priority = self.patterns.priority.captures(&normalized).and_then(|c| {
            match c.get(1).map(|m| m.as_str()) {
                Some("P0") => Some(Priority::P0),
                Some("P1") => Some(Priority::P1),
                Some("P2") => Some(Priority::P2),
                _ => None,
            }
        });
        let complexity = self.patterns.complexity.captures(&normalized).and_then(|c| {
            match c.get(1).map(|m| m.as_str().to_lowercase()).as_deref() {
                Some("trivial") => Some(Complexity::Trivial),
                Some("simple") => Some(Complexity::Simple),
                Some("moderate") => Some(Complexity::Moderate),
                Some("complex") => Some(Complexity::Complex),
                _ => None,
            }
        });
        let estimated_minutes = self.patterns.duration.captures(&normalized).and_then(|c| {
            let n: u32 = c.get(1)?.as_str().parse().ok()?;
            match c.get(2)?.as_str() {
                "h" | "hr" => Some(n.saturating_mul(60)),
                _ => Some(n),
            }
        });

        let mut item = TodoItem::new(normalized, status, now_ms);
        item.priority = priority;
        item.complexity = complexity;
        item.estimated_minutes = estimated_minutes;

        if self.todos.upsert(item) {
            self.todo_dirty = true;
        }
    }

    fn cap_accumulator(&mut self) {
        if self.acc.len() <= MAX_LINE_ACCUMULATOR {
            return;
        }
        let mut cut = self.acc.len() / 2;
        while !self.acc.is_char_boundary(cut) {
            cut += 1;
        }
        self.acc.drain(..cut);
    }

    fn cap_task_names(&mut self) {
        while self.task_names.len() > MAX_TASK_NUMBERS {
            let Some(lowest) = self.task_names.keys().min().copied() else { break };
            self.task_names.remove(&lowest);
        }
    }

    fn maybe_cleanup(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.last_cleanup_ms) < CLEANUP_INTERVAL_MS {
            return;
        }
        self.last_cleanup_ms = now_ms;
        if self.todos.expire(now_ms) {
            self.todo_dirty = true;
        }
        self.cap_task_names();
    }

    fn drain_due(&mut self, now_ms: u64, out: &mut Vec<TrackerEvent>) {
        if self.loop_dirty && now_ms.saturating_sub(self.last_loop_emit_ms) >= DEBOUNCE_MS {
            self.loop_dirty = false;
            self.last_loop_emit_ms = now_ms;
            out.push(TrackerEvent::LoopUpdate(self.loop_state()));
        }
        if self.todo_dirty && now_ms.saturating_sub(self.last_todo_emit_ms) >= DEBOUNCE_MS {
            self.todo_dirty = false;
            self.last_todo_emit_ms = now_ms;
            out.push(TrackerEvent::TodoUpdate(self.todos.items()));
        }
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
