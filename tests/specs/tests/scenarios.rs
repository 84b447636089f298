// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario suite: the supervision pipeline driven through its
//! public library surface.

use codeman::event::{names, Envelope};
use codeman::fanout::{EventFanout, CLIENT_QUEUE_DEPTH};
use codeman::respawn::machine::{Effect, Emission, Input, Machine, TimerKind, VerdictInput};
use codeman::respawn::{BreakerState, RespawnConfig, RespawnState};
use codeman::tracker::TrackerEvent;

use codeman_specs::{completions, fresh_tracker};

fn active_config() -> RespawnConfig {
    RespawnConfig { enabled: true, ..RespawnConfig::default() }
}

/// Feed tracker events into a controller machine the way the session task
/// routes them.
fn pump(machine: &mut Machine, events: &[TrackerEvent], now: u64) -> Vec<Effect> {
    let mut effects = Vec::new();
    for event in events {
        match event {
            TrackerEvent::CompletionDetected { .. } => {
                effects.extend(machine.on_event(Input::CompletionDetected, now));
            }
            TrackerEvent::StatusBlockDetected(block) => {
                effects.extend(machine.on_event(Input::StatusBlock(block.clone()), now));
            }
            TrackerEvent::CompletionIndicator { .. } => {
                effects.extend(machine.on_event(Input::CompletionIndicator, now));
            }
            _ => {}
        }
    }
    effects
}

// S1 — the prompt echo registers the phrase; the real marker completes.
#[test]
fn s1_prompt_echo_does_not_false_complete() {
    let mut tracker = fresh_tracker();

    let events = tracker
        .feed("When done, output exactly: <promise>ALL_TASKS_COMPLETE</promise>\n", 1_000);
    assert!(completions(&events).is_empty());
    assert_eq!(
        tracker.loop_state().completion_phrase.as_deref(),
        Some("ALL_TASKS_COMPLETE"),
        "the echoed template must register the expected phrase"
    );

    let events = tracker.feed("<promise>ALL_TASKS_COMPLETE</promise>\n", 2_000);
    assert_eq!(completions(&events), vec!["ALL_TASKS_COMPLETE".to_owned()]);
}

// S2 — a promise tag split across chunks completes exactly once.
#[test]
fn s2_cross_chunk_promise_tag() {
    let mut tracker = fresh_tracker();
    tracker.set_enabled(true);
    tracker.configure(Some("CROSS_CHUNK".to_owned()), None);
    tracker.set_loop_active(true);

    let mut all = tracker.feed("text <promise>CROSS_", 1_000);
    all.extend(tracker.feed("CHUNK</promise> more\n", 1_050));
    assert_eq!(completions(&all), vec!["CROSS_CHUNK".to_owned()]);
}

// S3 — three no-progress status blocks walk the breaker CLOSED → HALF_OPEN
// → OPEN; one progressing block closes it again.
#[test]
fn s3_circuit_breaker_opens_and_recovers() {
    let mut tracker = fresh_tracker();
    tracker.set_enabled(true);
    let mut machine = Machine::new(active_config());
    machine.on_event(Input::Working, 500);

    let no_progress = "---RALPH_STATUS---\nSTATUS: IN_PROGRESS\n\
                       TASKS_COMPLETED_THIS_LOOP: 0\nFILES_MODIFIED: 0\n\
                       ---END_RALPH_STATUS---\n";

    let expectations =
        [BreakerState::Closed, BreakerState::HalfOpen, BreakerState::Open];
    for (i, expected) in expectations.iter().enumerate() {
        let events = tracker.feed(no_progress, 1_000 + i as u64);
        pump(&mut machine, &events, 1_000 + i as u64);
        assert_eq!(machine.breaker().state, *expected, "after block {}", i + 1);
    }

    let progress = "---RALPH_STATUS---\nSTATUS: IN_PROGRESS\n\
                    TASKS_COMPLETED_THIS_LOOP: 2\nFILES_MODIFIED: 1\n\
                    ---END_RALPH_STATUS---\n";
    let events = tracker.feed(progress, 5_000);
    pump(&mut machine, &events, 5_000);
    assert_eq!(machine.breaker().state, BreakerState::Closed);
}

// S4 — an all-complete announcement with a wildly wrong count is ignored.
#[test]
fn s4_mismatched_announcement_is_ignored() {
    let mut tracker = fresh_tracker();
    tracker.set_enabled(true);
    tracker.feed("- [ ] first pending item\n", 1_000);
    tracker.feed("- [ ] second pending item\n", 1_100);

    tracker.feed("All 15 files have been created\n", 2_000);

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.todos.len(), 2);
    assert!(snapshot
        .todos
        .iter()
        .all(|t| t.status == codeman::tracker::todo::TodoStatus::Pending));
}

// S5 — the arbiter says WORKING: cool down, no injection.
#[test]
fn s5_ai_working_verdict_cools_down() {
    let mut machine = Machine::new(RespawnConfig {
        enabled: true,
        ai_idle_check: true,
        ..RespawnConfig::default()
    });
    machine.on_event(Input::Working, 1_000);
    let effects = machine.on_event(Input::Idle { tokens: 4, tail_hash: 9 }, 2_000);
    let generation = effects
        .iter()
        .find_map(|e| match e {
            Effect::StartTimer { kind: TimerKind::ConfirmIdle, generation, .. } => {
                Some(*generation)
            }
            _ => None,
        })
        .unwrap_or_default();

    let effects = machine.on_event(
        Input::TimerFired { generation, kind: TimerKind::ConfirmIdle, tokens: 4, tail_hash: 9 },
        12_000,
    );
    assert!(effects.iter().any(|e| matches!(e, Effect::RequestAiCheck)));

    let effects = machine.on_event(Input::Verdict(VerdictInput::Working), 13_000);
    assert!(
        !effects.iter().any(|e| matches!(e, Effect::Inject)),
        "WORKING verdict must not inject"
    );
    assert_eq!(machine.state(), RespawnState::CoolingDown);
    let cooldown = effects.iter().find_map(|e| match e {
        Effect::StartTimer { kind: TimerKind::Cooldown, after_ms, .. } => Some(*after_ms),
        _ => None,
    });
    assert_eq!(cooldown, Some(machine.config.ai_check_cooldown_ms));
}

// S6 — a backpressured SSE client is skipped and resynchronized with
// exactly one needsRefresh.
#[tokio::test]
async fn s6_backpressure_skip_and_refresh() {
    let fanout = EventFanout::new();
    let (_, mut fast_rx) = fanout.subscribe();
    let (_, mut slow_rx) = fanout.subscribe();

    for i in 0..CLIENT_QUEUE_DEPTH {
        fanout.publish(Envelope::new("mux:fill", serde_json::json!({ "i": i })));
    }
    for _ in 0..CLIENT_QUEUE_DEPTH {
        assert!(fast_rx.recv().await.is_some());
    }

    for i in 0..10 {
        fanout.publish(Envelope::new(
            names::SESSION_OUTPUT,
            serde_json::json!({ "sessionId": "s1", "seq": i }),
        ));
    }

    // Fast client: all ten.
    for i in 0..10 {
        let Some(envelope) = fast_rx.recv().await else { unreachable!("fast client starved") };
        assert_eq!(envelope.data.get("seq").and_then(|v| v.as_i64()), Some(i));
    }

    // Slow client: zero of the ten, then exactly one needsRefresh on drain.
    let mut backlog = 0;
    while let Ok(envelope) = slow_rx.try_recv() {
        assert_eq!(envelope.event, "mux:fill");
        backlog += 1;
    }
    assert_eq!(backlog, CLIENT_QUEUE_DEPTH);

    fanout.publish(Envelope::new(
        names::SESSION_OUTPUT,
        serde_json::json!({ "sessionId": "s1", "seq": 10 }),
    ));
    let Ok(refresh) = slow_rx.try_recv() else { unreachable!("expected needsRefresh") };
    assert_eq!(refresh.event, names::SESSION_NEEDS_REFRESH);
    assert!(slow_rx.try_recv().is_err(), "exactly one needsRefresh, nothing else");

    fanout.publish(Envelope::new(
        names::SESSION_OUTPUT,
        serde_json::json!({ "sessionId": "s1", "seq": 11 }),
    ));
    let Ok(envelope) = slow_rx.try_recv() else { unreachable!("stream should resume") };
    assert_eq!(envelope.data.get("seq").and_then(|v| v.as_i64()), Some(11));
}

// The dual-condition exit gate: two completion indicators plus an exit
// signal end the run cleanly.
#[test]
fn exit_gate_from_tracker_events() {
    let mut tracker = fresh_tracker();
    tracker.set_enabled(true);
    let mut machine = Machine::new(active_config());
    machine.on_event(Input::Working, 500);

    let complete_block = "---RALPH_STATUS---\nSTATUS: COMPLETE\n\
                          TASKS_COMPLETED_THIS_LOOP: 1\nFILES_MODIFIED: 1\n\
                          EXIT_SIGNAL: false\n---END_RALPH_STATUS---\n";
    let events = tracker.feed(complete_block, 1_000);
    pump(&mut machine, &events, 1_000);
    assert_eq!(machine.state(), RespawnState::Observing);

    let final_block = "---RALPH_STATUS---\nSTATUS: COMPLETE\n\
                       TASKS_COMPLETED_THIS_LOOP: 1\nFILES_MODIFIED: 0\n\
                       EXIT_SIGNAL: true\n---END_RALPH_STATUS---\n";
    let events = tracker.feed(final_block, 2_000);
    let effects = pump(&mut machine, &events, 2_000);
    assert!(effects.iter().any(|e| matches!(e, Effect::Emit(Emission::ExitGateMet))));
    assert_eq!(machine.state(), RespawnState::CoolingDown);
}

// A full supervision round trip at the parser level: iteration, todos,
// status block, completion — checking event ordering end to end.
#[test]
fn tracker_to_controller_round_trip() {
    let mut tracker = fresh_tracker();
    let mut machine = Machine::new(active_config());
    machine.on_event(Input::Working, 100);

    let transcript = "Ralph iteration 1 of 3\n\
                      - [ ] port the session loop\n\
                      Task #1 created: port the session loop\n\
                      ---RALPH_STATUS---\nSTATUS: IN_PROGRESS\n\
                      TASKS_COMPLETED_THIS_LOOP: 1\nFILES_MODIFIED: 2\n\
                      ---END_RALPH_STATUS---\n\
                      <promise>ROUND_TRIP_DONE</promise>\n";

    let mut events = tracker.feed(transcript, 1_000);
    events.extend(tracker.flush_pending_events());

    // Auto-enable fired, the loop went active, and the active loop makes
    // the first tagged occurrence complete.
    assert!(events.contains(&TrackerEvent::Enabled));
    assert_eq!(completions(&events), vec!["ROUND_TRIP_DONE".to_owned()]);

    pump(&mut machine, &events, 1_000);
    assert_eq!(machine.state(), RespawnState::CoolingDown);
    assert_eq!(machine.breaker().state, BreakerState::Closed);

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.cumulative.blocks, 1);
    assert!(snapshot
        .todos
        .iter()
        .all(|t| t.status == codeman::tracker::todo::TodoStatus::Completed));
}

// Stopping and restarting a machine with the same inputs lands in the same
// state (controller determinism, property 2).
#[test]
fn controller_replay_determinism() {
    let inputs = vec![
        (Input::Working, 1_000u64),
        (Input::Output { tokens: 1, tail_hash: 2 }, 1_500),
        (Input::Idle { tokens: 1, tail_hash: 2 }, 2_000),
        (Input::CompletionDetected, 3_000),
        (Input::Working, 4_000),
        (Input::CompletionIndicator, 5_000),
    ];
    let run = |inputs: &[(Input, u64)]| {
        let mut machine = Machine::new(active_config());
        for (input, now) in inputs {
            machine.on_event(input.clone(), *now);
        }
        (machine.state(), machine.cycles(), machine.breaker().state)
    };
    assert_eq!(run(&inputs), run(&inputs));
}
