// Logging setup
//
// Besides the usual stdout formatter, INFO and above are relayed to every
// connected operator so the UI can show what the rover is doing.

use std::fmt::Write as _;

use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Lines kept for operators that fall behind
const RELAY_CAPACITY: usize = 256;

/// Tracing layer that forwards formatted events into a broadcast channel
pub struct LogRelay {
    tx: broadcast::Sender<String>,
}

impl LogRelay {
    pub fn new() -> (Self, broadcast::Sender<String>) {
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        (Self { tx: tx.clone() }, tx)
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRelay {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO || self.tx.receiver_count() == 0 {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        // No operators listening is not an error
        let _ = self
            .tx
            .send(format!("{}: {}{}", level, visitor.message, visitor.fields));
    }
}

/// Install the global subscriber (set RUST_LOG=info or debug). Returns the
/// sender operator sessions subscribe to.
pub fn init() -> broadcast::Sender<String> {
    let (relay, tx) = LogRelay::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(relay)
        .init();
    tx
}
