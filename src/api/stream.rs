//! Server-sent event stream of deal changes.

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use tracing::info;

use crate::api::routes::ApiState;
use crate::fanout::StreamEvent;
use crate::state::DealStore;

fn to_sse(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

/// `connected` first, then every published event until the client goes away
/// or the fan-out closes. Dropping the stream unsubscribes.
pub async fn stream_events<S: DealStore>(
    State(state): State<ApiState<S>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.fanout.subscribe();
    info!(
        subscriber = subscription.id(),
        subscribers = state.fanout.subscriber_count(),
        "stream client connected"
    );

    let connected = stream::once(async { Ok(to_sse(&StreamEvent::Connected)) });
    let changes = stream::unfold(subscription, |mut subscription| async move {
        let Some(event) = subscription.recv().await else {
            info!(
                subscriber = subscription.id(),
                dropped = subscription.dropped(),
                "stream closed by server"
            );
            return None;
        };
        Some((Ok(to_sse(&event)), subscription))
    });

    Sse::new(connected.chain(changes))
}
