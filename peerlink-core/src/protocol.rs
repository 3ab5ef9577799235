//! PeerLink control protocol: datagram message types.

use serde::{Deserialize, Serialize};

/// Control and presence datagrams. Encoding is JSON tagged by `"type"` (see wire module),
/// so peers may add fields without breaking older decoders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Presence: advertise the sender's display name. Sent to the broadcast address.
    Announce {
        #[serde(rename = "username")]
        display_name: String,
    },
    /// Ask the recipient to start a call.
    CallRequest,
    /// Recipient agreed; both sides open their media connections.
    CallAccept,
    /// Recipient refused the request.
    CallDecline,
    /// Either side hung up. Fire-and-forget, never acknowledged.
    CallEnd,
}

impl Message {
    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Announce { .. } => "announce",
            Message::CallRequest => "call_request",
            Message::CallAccept => "call_accept",
            Message::CallDecline => "call_decline",
            Message::CallEnd => "call_end",
        }
    }
}

/// Text datagram body: `"{display_name}: {message}"`.
pub fn compose_text(display_name: &str, message: &str) -> String {
    format!("{}: {}", display_name, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_prefixes_sender() {
        assert_eq!(compose_text("alice", "hi there"), "alice: hi there");
    }

    #[test]
    fn kinds_match_wire_tags() {
        let json = serde_json::to_value(Message::CallDecline).unwrap();
        assert_eq!(json["type"], Message::CallDecline.kind());
    }
}
