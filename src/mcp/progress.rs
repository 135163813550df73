//! `notifications/progress` for tool calls that carry a progress token

use super::protocol::{JsonRpcNotification, OutgoingMessage};
use crate::progress::{Progress, ProgressSink};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Forwards progress to the client as notifications
pub struct NotificationSink {
    token: Value,
    outgoing: UnboundedSender<OutgoingMessage>,
}

impl NotificationSink {
    pub fn new(token: Value, outgoing: UnboundedSender<OutgoingMessage>) -> Self {
        Self { token, outgoing }
    }
}

impl ProgressSink for NotificationSink {
    fn report(&self, progress: u32, total: u32, message: Option<&str>) {
        let mut params = json!({
            "progressToken": self.token,
            "progress": progress,
            "total": total,
        });
        if let Some(message) = message {
            params["message"] = json!(message);
        }
        let notification = JsonRpcNotification::new("notifications/progress", params);
        if self.outgoing.send(OutgoingMessage::Notification(notification)).is_err() {
            tracing::debug!("Output closed, dropping progress update");
        }
    }
}

/// Progress handle for a call; silent when the client sent no token
pub fn progress_for(token: Option<Value>, outgoing: &UnboundedSender<OutgoingMessage>) -> Progress {
    match token {
        Some(token) => Progress::new(Arc::new(NotificationSink::new(token, outgoing.clone()))),
        None => Progress::none(),
    }
}
