use tokio::sync::mpsc;

use crate::types::ClientState;

/// Receives everything the client wants shown to a user.
///
/// Calls for one request arrive in order and never concurrently. An
/// implementation should return quickly: stream chunks are delivered while
/// the client holds its request lock.
pub trait EventSink: Send + Sync {
    fn on_user_message(&self, text: &str);
    fn on_system_message(&self, text: &str);
    fn on_assistant_message_start(&self, text: &str);
    fn on_assistant_message_append(&self, text: &str);
    fn on_state_change(&self, state: ClientState);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    UserMessage(String),
    SystemMessage(String),
    AssistantMessageStart(String),
    AssistantMessageAppend(String),
    StateChange(ClientState),
}

/// Forwards events to an unbounded channel for a consumer on another task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ClientEvent) {
        // A dropped receiver means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_user_message(&self, text: &str) {
        self.send(ClientEvent::UserMessage(text.to_string()));
    }

    fn on_system_message(&self, text: &str) {
        self.send(ClientEvent::SystemMessage(text.to_string()));
    }

    fn on_assistant_message_start(&self, text: &str) {
        self.send(ClientEvent::AssistantMessageStart(text.to_string()));
    }

    fn on_assistant_message_append(&self, text: &str) {
        self.send(ClientEvent::AssistantMessageAppend(text.to_string()));
    }

    fn on_state_change(&self, state: ClientState) {
        self.send(ClientEvent::StateChange(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.on_state_change(ClientState::Running);
        sink.on_assistant_message_start("a");
        sink.on_assistant_message_append("b");
        sink.on_state_change(ClientState::Idle);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                ClientEvent::StateChange(ClientState::Running),
                ClientEvent::AssistantMessageStart("a".to_string()),
                ClientEvent::AssistantMessageAppend("b".to_string()),
                ClientEvent::StateChange(ClientState::Idle),
            ]
        );
    }

    #[test]
    fn sending_after_receiver_drop_is_silent() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.on_system_message("nobody listening");
    }
}
