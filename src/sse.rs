//! SSE Serializer (C7): turns the consumer side of the event bus into an
//! `axum` SSE response. One frame per `UploadEvent`, flushed immediately;
//! the stream ends as soon as the bus closes (the producer side was dropped
//! by the pipeline orchestrator), per §4.7.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::events::EventReceiver;

pub fn stream(rx: EventReceiver) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = ReceiverStream::new(rx).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(payload))
    });

    Sse::new(frames).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{channel, UploadEvent};
    use futures::pin_mut;

    #[tokio::test]
    async fn frames_are_produced_in_order_and_stream_ends_on_close() {
        let (tx, rx) = channel();
        tx.send(UploadEvent::uploading(0.0, "start")).await.unwrap();
        tx.send(UploadEvent::error("boom")).await.unwrap();
        drop(tx);

        let frames = ReceiverStream::new(rx).map(|event| serde_json::to_string(&event).unwrap());
        pin_mut!(frames);

        let first = frames.next().await.unwrap();
        assert!(first.contains("\"uploading\""));
        let second = frames.next().await.unwrap();
        assert!(second.contains("\"error\""));
        assert!(frames.next().await.is_none());
    }
}
