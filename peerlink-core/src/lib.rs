//! PeerLink core: control protocol, wire codec and the shared session state.
//! Host-driven: no sockets here; the platform daemon owns I/O and calls into these containers.

pub mod call;
pub mod device;
pub mod error;
pub mod host;
pub mod inbox;
pub mod mailbox;
pub mod peers;
pub mod protocol;
pub mod recorder;
pub mod wire;

pub use call::{CallRole, CallSession, CallStatus, CallTable};
pub use device::{AudioSink, AudioSource, MediaDevices, VideoSink, VideoSource};
pub use error::{Error, Result};
pub use host::{CallDecision, Collaborator, Headless, VoiceDecision};
pub use inbox::{Routed, TextInbox};
pub use mailbox::{PendingVoice, VoiceMailboxSlot};
pub use peers::{Discovery, PeerRecord, PeerSet};
pub use protocol::{compose_text, Message};
pub use recorder::VoiceRecorder;
pub use wire::{
    decode_message, encode_message, frame_header, parse_header, FrameDecodeError,
    FrameEncodeError,
};
