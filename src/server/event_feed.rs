//! Live event feed over Server-Sent Events.
//!
//! The feed polls the event store and never pushes: each poll asks for
//! events with an id strictly greater than the last one sent, so a client
//! reconnecting with `Last-Event-ID` resumes without gaps or duplicates.
//! The stream ends after the terminal event, or when the wall-clock ceiling
//! is reached.

use super::api_error::ApiError;
use super::job_routes::{load_job, EventsQuery};
use super::metrics;
use super::state::ServerState;
use crate::jobs::JobEvent;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const LAST_EVENT_ID: &str = "last-event-id";
const CLIENT_RETRY: Duration = Duration::from_millis(1000);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Keeps the open-feeds gauge in step with the stream's lifetime.
struct FeedGuard;

impl FeedGuard {
    fn open() -> Self {
        metrics::event_feed_opened();
        FeedGuard
    }
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        metrics::event_feed_closed();
    }
}

struct FeedCursor {
    state: ServerState,
    job_id: String,
    after: i64,
    deadline: Instant,
    pending: VecDeque<JobEvent>,
    greeted: bool,
    polled: bool,
    done: bool,
    _guard: FeedGuard,
}

enum Step {
    Emit(Event),
    Wait,
    End,
}

impl FeedCursor {
    fn step(&mut self) -> Step {
        if !self.greeted {
            self.greeted = true;
            return Step::Emit(Event::default().retry(CLIENT_RETRY).comment("feed open"));
        }
        if let Some(event) = self.pending.pop_front() {
            self.after = event.id;
            if event.is_terminal() {
                self.done = true;
            }
            return match Event::default().id(event.id.to_string()).json_data(&event) {
                Ok(sse) => Step::Emit(sse),
                Err(e) => {
                    warn!("Failed to encode event {}: {}", event.id, e);
                    Step::Wait
                }
            };
        }
        if self.done || Instant::now() >= self.deadline {
            Step::End
        } else {
            Step::Wait
        }
    }

    async fn poll(&mut self) {
        if self.polled {
            let poll_interval = self.state.config.feed.poll_interval;
            let wake = std::cmp::min(Instant::now() + poll_interval, self.deadline);
            tokio::time::sleep_until(wake).await;
        }
        self.polled = true;

        let page_size = self.state.config.feed.page_size;
        match self
            .state
            .event_store
            .events_after(&self.job_id, self.after, page_size)
        {
            Ok(events) if events.is_empty() => {
                // A terminal job gets no further events; the client already saw the last one
                if let Ok(Some(job)) = self.state.job_store.get_job(&self.job_id) {
                    if job.status.is_terminal() {
                        self.done = true;
                    }
                }
            }
            Ok(events) => self.pending.extend(events),
            Err(e) => {
                warn!("Event feed for job {} failed: {:#}", self.job_id, e);
                self.done = true;
            }
        }
    }
}

/// Resume point: `Last-Event-ID` wins over `?after=`.
fn resume_after(headers: &HeaderMap, query: &EventsQuery) -> i64 {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(query.after)
}

pub async fn stream_job_events(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    load_job(&state.job_store, &id)?;
    let after = resume_after(&headers, &query);
    debug!("Opening event feed for job {} after {}", id, after);

    let cursor = FeedCursor {
        deadline: Instant::now() + state.config.feed.ceiling,
        state,
        job_id: id,
        after,
        pending: VecDeque::new(),
        greeted: false,
        polled: false,
        done: false,
        _guard: FeedGuard::open(),
    };

    let stream = stream::unfold(cursor, |mut cursor| async move {
        loop {
            match cursor.step() {
                Step::Emit(event) => return Some((Ok(event), cursor)),
                Step::End => {
                    debug!(
                        "Closing event feed for job {} at {}",
                        cursor.job_id, cursor.after
                    );
                    return None;
                }
                Step::Wait => cursor.poll().await,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}
