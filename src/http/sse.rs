use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::replay::TelemetryPipeline;

type BoxedEvents = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub type MetricStream = Sse<BoxedEvents>;

/// Build a Server-Sent Events stream of live pipeline metrics.
pub fn pipeline_metrics(pipeline: &TelemetryPipeline) -> MetricStream {
    let receiver = pipeline.hub().collector().subscribe();

    let stream = BroadcastStream::new(receiver).filter_map(|result| async move {
        match result {
            Ok(metric) => match serde_json::to_string(&metric) {
                Ok(payload) => Some(Ok(Event::default().event("pipeline_metric").data(payload))),
                Err(_) => None,
            },
            Err(_) => None,
        }
    });

    let stream: BoxedEvents = Box::pin(stream);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(5))
            .text("replay-keepalive"),
    )
}
