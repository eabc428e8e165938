//! テスト用: WARN イベントを記録する tracing layer

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Registry;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Collects the message of every WARN event on the current thread.
#[derive(Clone, Default)]
pub(crate) struct WarnCapture {
    messages: Arc<Mutex<Vec<String>>>,
}

impl WarnCapture {
    /// Install as the thread default until the guard drops. `#[tokio::test]`
    /// runs on a current-thread runtime, so async code is covered too.
    pub(crate) fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let guard = tracing::subscriber::set_default(Registry::default().with(capture.clone()));
        (capture, guard)
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl<S: Subscriber> Layer<S> for WarnCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut message = MessageVisitor(String::new());
        event.record(&mut message);
        self.messages.lock().unwrap().push(message.0);
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}
