//! Echoes the human turn to the console under a title header.

use std::sync::Arc;

use crate::bus::{Content, Event, EventBus, EventKind, Listener, ListenerFuture};
use crate::render::Console;

use super::unexpected;

pub struct Printer {
    console: Arc<Console>,
}

impl Printer {
    pub fn new(console: Arc<Console>) -> Self {
        Self { console }
    }
}

impl Listener for Printer {
    fn name(&self) -> &str {
        "printer"
    }

    fn listen<'a>(&'a self, event: &'a Event, _bus: &'a EventBus) -> ListenerFuture<'a> {
        Box::pin(async move {
            let text = match (event.kind(), event.contents()) {
                (EventKind::HumanRawMessage, Content::PlainText(text)) => text,
                (kind, contents) => return Err(unexpected(self.name(), kind, contents)),
            };
            self.console.title(event.author(), event.created_at());
            self.console.write(text);
            self.console.finish();
            Ok(())
        })
    }
}
