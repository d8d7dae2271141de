use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

/// One serialized frame fanned out to every subscriber of a channel.
#[derive(Clone, Debug)]
pub struct ChannelMessage {
    pub event: &'static str,
    pub frame: String,
}

impl ChannelMessage {
    /// Serialize a `{"event": ..., "data": ...}` frame once, so the encoding
    /// cost is paid per broadcast rather than per subscriber.
    pub fn json<T: Serialize>(event: &'static str, data: &T) -> Self {
        let frame = serde_json::to_string(&json!({ "event": event, "data": data }))
            .unwrap_or_else(|_| format!(r#"{{"event":"{event}","data":null}}"#));
        Self { event, frame }
    }
}

/// Broadcast hub keyed by channel name.
///
/// Channels are created lazily on first subscribe or publish; a publish with
/// no live subscribers is silently dropped.
pub struct RoomHub {
    channels: DashMap<String, broadcast::Sender<ChannelMessage>>,
    capacity: usize,
}

impl RoomHub {
    /// Construct a hub whose per-channel broadcast buffers hold `capacity`
    /// messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    /// Register a subscriber on the named channel, creating it if needed.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        self.sender(channel).subscribe()
    }

    /// Send a message to every subscriber of the named channel, ignoring
    /// delivery errors.
    pub fn publish(&self, channel: &str, message: ChannelMessage) {
        let _ = self.sender(channel).send(message);
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ChannelMessage> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

/// Channel receiving the room-wide notices.
pub fn room_channel(room_id: &str) -> String {
    room_id.to_string()
}

/// Channel receiving the presenter-only detail variants.
pub fn presenter_channel(room_id: &str) -> String {
    format!("{room_id}:presenter")
}

/// Channel receiving the audience-safe aggregate variants.
pub fn audience_channel(room_id: &str) -> String {
    format!("{room_id}:audience")
}

/// Private channel of a single participant.
pub fn participant_channel(participant_id: &str) -> String {
    format!("participant:{participant_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_that_channel() {
        let hub = RoomHub::new(8);
        let mut r1 = hub.subscribe(&room_channel("r1"));
        let mut r2 = hub.subscribe(&room_channel("r2"));

        hub.publish(&room_channel("r1"), ChannelMessage::json("ping", &1));

        assert_eq!(r1.recv().await.unwrap().event, "ping");
        assert!(r2.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let hub = RoomHub::new(8);
        hub.publish("empty", ChannelMessage::json("ping", &()));
    }

    #[test]
    fn frames_carry_the_event_wrapper() {
        let message = ChannelMessage::json("score_update", &serde_json::json!({"score": 3}));
        // Key order in the frame is not part of the contract; compare values.
        let parsed: serde_json::Value = serde_json::from_str(&message.frame).unwrap();
        assert_eq!(parsed["event"], "score_update");
        assert_eq!(parsed["data"]["score"], 3);
    }
}
