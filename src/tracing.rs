use std::convert::Infallible;
use std::fmt;

use axum::response::sse::{Event, KeepAlive};
use axum::response::Sse;
use axum::Extension;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Targets too chatty to mirror into the public log stream.
const MUTED_TARGETS: &[&str] = &["hyper", "mio", "sqlx", "reqwest"];

#[derive(Debug)]
struct PublicLogLayer {
    channel: broadcast::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct LogChannel(pub broadcast::Sender<String>);

impl LogChannel {
    pub async fn into_sse_stream(
        Extension(channel): Extension<LogChannel>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let receiver = channel.0.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(receiver).map(|item| {
            if let Ok(item) = item {
                Ok(Event::default().data(item))
            } else {
                Ok(Event::default())
            }
        });

        Sse::new(stream).keep_alive(KeepAlive::default())
    }
}

struct JsonVisitor {
    fields: Map<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }
}

impl<S: Subscriber> Layer<S> for PublicLogLayer {
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        let target = metadata.target();
        !MUTED_TARGETS.iter().any(|muted| target.starts_with(muted))
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let mut visitor = JsonVisitor { fields: Map::new() };
        event.record(&mut visitor);
        let json = serde_json::json!({
            "timestamp": time::OffsetDateTime::now_utc().to_string(),
            "target": metadata.target(),
            "level": metadata.level().to_string(),
            "fields": visitor.fields,
        });
        let _ = self
            .channel
            .send(serde_json::to_string(&json).expect("log event serializes"));
    }
}

pub fn init_tracer(max_level: Level) -> LogChannel {
    let (tx, _) = broadcast::channel(100);
    let public_layer = PublicLogLayer {
        channel: tx.clone(),
    };
    tracing_subscriber::fmt()
        .with_max_level(max_level)
        .finish()
        .with(public_layer)
        .init();
    LogChannel(tx)
}
