//! Operator console: one command per stdin line.

use std::net::IpAddr;

use anyhow::{anyhow, bail, Context, Result};
use peerlink_core::{CallDecision, CallStatus, Collaborator, VoiceDecision};

use crate::node::Node;

pub const HELP: &str = "\
commands:
  peers                     list discovered peers
  call <ip>                 request a call
  accept <ip>               accept an incoming call
  decline <ip>              decline an incoming call
  hangup <ip>               end a call
  text <ip> <message...>    send a text
  open <ip>                 open a chat window (shows the backlog)
  close <ip>                close a chat window
  record / stop             start / stop recording a voice message
  send-voice <ip>           send the last recording
  play / reject             play or discard the pending voice message
  status                    calls, recording and pending voice message
  help                      this text
  quit                      shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peers,
    Call(IpAddr),
    Accept(IpAddr),
    Decline(IpAddr),
    Hangup(IpAddr),
    Text(IpAddr, String),
    Open(IpAddr),
    Close(IpAddr),
    Record,
    Stop,
    SendVoice(IpAddr),
    Play,
    Reject,
    Status,
    Help,
    Quit,
}

/// Parse one console line. Ok(None) for a blank line.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let cmd = match word {
        "peers" => Command::Peers,
        "call" => Command::Call(addr(rest)?),
        "accept" => Command::Accept(addr(rest)?),
        "decline" => Command::Decline(addr(rest)?),
        "hangup" => Command::Hangup(addr(rest)?),
        "text" => {
            let (ip, message) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("usage: text <ip> <message...>"))?;
            let message = message.trim();
            if message.is_empty() {
                bail!("usage: text <ip> <message...>");
            }
            Command::Text(addr(ip)?, message.to_string())
        }
        "open" => Command::Open(addr(rest)?),
        "close" => Command::Close(addr(rest)?),
        "record" => Command::Record,
        "stop" => Command::Stop,
        "send-voice" => Command::SendVoice(addr(rest)?),
        "play" => Command::Play,
        "reject" => Command::Reject,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{}' (try 'help')", other),
    };
    Ok(Some(cmd))
}

fn addr(s: &str) -> Result<IpAddr> {
    if s.is_empty() {
        bail!("missing peer address");
    }
    s.parse()
        .with_context(|| format!("'{}' is not an IP address", s))
}

/// Whether the console should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command against the node, printing the outcome.
pub async fn execute(node: &Node, cmd: Command) -> Result<Flow> {
    match cmd {
        Command::Peers => {
            let peers = node.peers();
            if peers.is_empty() {
                println!("no peers discovered yet");
            }
            for p in peers {
                println!("  {:<15} {}", p.address, p.display_name);
            }
        }
        Command::Call(peer) => {
            node.start_call(peer).await?;
            println!("calling {}...", peer);
        }
        Command::Accept(peer) => {
            node.accept_call(peer).await?;
            println!("call with {} started", peer);
        }
        Command::Decline(peer) => {
            node.decline_call(peer).await?;
            println!("declined call from {}", peer);
        }
        Command::Hangup(peer) => {
            if node.call_status(peer) == CallStatus::Idle {
                println!("no call with {}", peer);
            }
            node.end_call(peer).await?;
        }
        Command::Text(peer, message) => node.send_text(peer, &message).await?,
        Command::Open(peer) => {
            // Backlog lines are printed by the collaborator as they are delivered.
            let n = node.open_window(peer).len();
            println!("window for {} open ({} unread)", peer, n);
        }
        Command::Close(peer) => {
            if !node.close_window(peer) {
                println!("no window open for {}", peer);
            }
        }
        Command::Record => {
            node.start_recording()?;
            println!("recording... ('stop' to finish)");
        }
        Command::Stop => {
            let chunks = node.stop_recording()?;
            println!("recorded {} chunks", chunks);
        }
        Command::SendVoice(peer) => {
            let bytes = node.send_voice_recording(peer).await?;
            println!("sent {} bytes to {}", bytes, peer);
        }
        Command::Play => match node.play_voice_message().await? {
            Some((peer, bytes)) => println!("played {} bytes from {}", bytes, peer),
            None => println!("no voice message pending"),
        },
        Command::Reject => match node.reject_voice_message() {
            Some(peer) => println!("discarded voice message from {}", peer),
            None => println!("no voice message pending"),
        },
        Command::Status => {
            let b = node.bound();
            println!("name: {}", node.display_name());
            println!(
                "ports: discovery {} control {} text {} video {}/{} voice {}",
                b.discovery.port(),
                b.control.port(),
                b.text.port(),
                b.video.port(),
                b.return_video.port(),
                b.voice.port()
            );
            for s in node.calls() {
                println!("  call {:<15} {:?} ({:?})", s.peer, s.status, s.role);
            }
            println!("recording: {}", if node.is_recording() { "yes" } else { "no" });
            if let Some(peer) = node.pending_voice() {
                println!("voice message pending from {}", peer);
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Prints notifications and leaves every decision to the operator.
#[derive(Debug, Default)]
pub struct ConsoleCollaborator;

impl Collaborator for ConsoleCollaborator {
    fn incoming_call(&self, peer: IpAddr) -> CallDecision {
        println!("* incoming call from {} ('accept {}' or 'decline {}')", peer, peer, peer);
        CallDecision::Defer
    }

    fn incoming_voice_message(&self, peer: IpAddr) -> VoiceDecision {
        println!("* voice message from {} ('play' or 'reject')", peer);
        VoiceDecision::Defer
    }

    fn text_message(&self, message: &str, peer: IpAddr) {
        println!("[{}] {}", peer, message);
    }

    fn call_ended(&self, peer: IpAddr) {
        println!("* call with {} ended", peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn parses_commands_with_addresses() {
        assert_eq!(parse("peers").unwrap(), Some(Command::Peers));
        assert_eq!(
            parse("  call 192.168.1.20 ").unwrap(),
            Some(Command::Call(ip("192.168.1.20")))
        );
        assert_eq!(
            parse("send-voice 10.0.0.2").unwrap(),
            Some(Command::SendVoice(ip("10.0.0.2")))
        );
        assert_eq!(parse("exit").unwrap(), Some(Command::Quit));
        assert_eq!(parse("").unwrap(), None);
    }

    #[test]
    fn text_keeps_whole_message() {
        assert_eq!(
            parse("text 10.0.0.2 see you  at 5").unwrap(),
            Some(Command::Text(ip("10.0.0.2"), "see you  at 5".into()))
        );
        assert!(parse("text 10.0.0.2").is_err());
        assert!(parse("text 10.0.0.2    ").is_err());
    }

    #[test]
    fn bad_input_reported() {
        assert!(parse("call").is_err());
        assert!(parse("call bob").is_err());
        assert!(parse("dance").is_err());
    }

    #[test]
    fn console_defers_decisions() {
        let c = ConsoleCollaborator;
        assert_eq!(c.incoming_call(ip("10.0.0.2")), CallDecision::Defer);
        assert_eq!(c.incoming_voice_message(ip("10.0.0.2")), VoiceDecision::Defer);
    }
}
