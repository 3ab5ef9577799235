//! Collaborator hooks: how the node reaches the UI or decision layer.

use std::net::IpAddr;

/// Answer to an inbound call request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDecision {
    Accept,
    Decline,
    /// Decide later through the node's accept/decline operations.
    Defer,
}

/// Answer to an inbound voice message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceDecision {
    Play,
    Reject,
    /// Leave the message pending for a later play/reject.
    Defer,
}

/// Notifications the node raises. Injected once at construction; every method has a headless
/// default so the node runs without any UI: calls are declined, voice messages stay pending,
/// texts are only kept in the backlog.
///
/// Methods are called from listener tasks and must return quickly. `text_message` runs while
/// the text inbox is locked and must not call back into the node's window operations.
pub trait Collaborator: Send + Sync + 'static {
    fn incoming_call(&self, _peer: IpAddr) -> CallDecision {
        CallDecision::Decline
    }

    fn incoming_voice_message(&self, _peer: IpAddr) -> VoiceDecision {
        VoiceDecision::Defer
    }

    fn text_message(&self, _message: &str, _peer: IpAddr) {}

    fn call_ended(&self, _peer: IpAddr) {}
}

/// No UI attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct Headless;

impl Collaborator for Headless {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_defaults() {
        let peer: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(Headless.incoming_call(peer), CallDecision::Decline);
        assert_eq!(Headless.incoming_voice_message(peer), VoiceDecision::Defer);
    }
}
