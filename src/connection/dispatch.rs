use crate::error::ErrorCategory;
use crate::notify::Notifier;
use crate::protocol::{decode_frame, DecodeError};
use crate::store::HandlerTable;

/// Outcome of routing one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    Dropped(ErrorCategory),
}

/// Decode a text frame and hand its payload to the matching handler.
///
/// Malformed frames are logged and dropped. Unknown action/type pairs are
/// reported to the user as a warning. Neither affects the channel.
pub fn dispatch_frame(text: &str, handlers: &HandlerTable, notifier: &dyn Notifier) -> Dispatch {
    let event = match decode_frame(text) {
        Ok(event) => event,
        Err(err) => return reject(&err, text, notifier),
    };

    let key = event.key;
    if handlers.dispatch(event) {
        tracing::debug!(handler = %key, "dispatched event");
        Dispatch::Delivered
    } else {
        // Not reached with a table from `HandlerTableBuilder::build`
        let err = DecodeError::Unsupported {
            action: key.action.as_str().to_string(),
            kind: key.entity.as_str().to_string(),
        };
        reject(&err, text, notifier)
    }
}

fn reject(err: &DecodeError, text: &str, notifier: &dyn Notifier) -> Dispatch {
    let category = err.category();
    tracing::warn!(?category, frame = %text, "dropping frame: {err}");
    if let Some(severity) = category.severity() {
        notifier.notify(&err.to_string(), severity);
    }
    Dispatch::Dropped(category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Severity;
    use crate::protocol::EventKey;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;

    #[derive(Default)]
    struct Notices(Mutex<Vec<(String, Severity)>>);

    impl Notifier for Notices {
        fn notify(&self, message: &str, severity: Severity) {
            self.0.lock().push((message.to_string(), severity));
        }

        fn panic(&self, _message: &str, _context_id: Option<&str>, _user_initiated: bool) {}
    }

    fn table(log: Arc<Mutex<Vec<EventKey>>>) -> HandlerTable {
        EventKey::all()
            .fold(HandlerTable::builder(), |builder, key| {
                let log = log.clone();
                builder.on(key, move |_: Value| log.lock().push(key))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_outcomes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handlers = table(log.clone());
        let notices = Notices::default();

        let delivered = dispatch_frame(
            r#"{"action":"delete","type":"retrospective","value":null}"#,
            &handlers,
            &notices,
        );
        assert_eq!(delivered, Dispatch::Delivered);
        assert_eq!(log.lock().len(), 1);

        let malformed = dispatch_frame("[1, 2", &handlers, &notices);
        assert_eq!(malformed, Dispatch::Dropped(ErrorCategory::Decode));
        assert!(notices.0.lock().is_empty());

        let unsupported = dispatch_frame(
            r#"{"action":"archive","type":"answer","value":{}}"#,
            &handlers,
            &notices,
        );
        assert_eq!(unsupported, Dispatch::Dropped(ErrorCategory::Routing));
        assert_eq!(notices.0.lock().len(), 1);
        assert_eq!(notices.0.lock()[0].1, Severity::Warning);
        assert_eq!(log.lock().len(), 1);
    }
}
