use crate::upstream::ResponseEvent;

/// What the receiver hands to the outbound task.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Audio(Vec<u8>),
    Text(String),
    TurnComplete,
}

/// Split one response into tagged events: audio, then text, then turn completion.
pub fn classify(event: ResponseEvent) -> Vec<UpstreamEvent> {
    let mut events = Vec::with_capacity(3);
    if let Some(audio) = event.audio.filter(|a| !a.is_empty()) {
        events.push(UpstreamEvent::Audio(audio));
    }
    if let Some(text) = event.text {
        events.push(UpstreamEvent::Text(text));
    }
    if event.turn_complete {
        events.push(UpstreamEvent::TurnComplete);
    }
    events
}
