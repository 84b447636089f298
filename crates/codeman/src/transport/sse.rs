// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE client channel: one `init` snapshot on connect, then streamed
//! `{event, data}` deltas.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::event::{names, Envelope};

use super::ApiState;

fn to_sse_event(envelope: &Envelope) -> Event {
    let data = serde_json::to_string(&envelope.data).unwrap_or_else(|_| "{}".to_owned());
    Event::default().event(envelope.event.clone()).data(data)
}

/// `GET /api/v1/events`.
///
/// Dropping the connection drops the receiver; the fanout prunes the dead
/// client on its next publish. Reconnecting clients re-register and receive
/// a fresh `init`.
pub async fn events(
    State(state): State<Arc<ApiState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (_, rx) = state.supervisor.fanout.subscribe();

    let init = Envelope::new(names::INIT, state.supervisor.snapshot_json().await);
    let init_event = to_sse_event(&init);

    let stream = stream::once(async move { Ok(init_event) })
        .chain(ReceiverStream::new(rx).map(|envelope| Ok(to_sse_event(&envelope))));

    Sse::new(stream).keep_alive(KeepAlive::default())
}
