//! Load config from file and environment.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Node configuration. File: ~/.config/peerlink/config.toml or /etc/peerlink/config.toml.
/// Env overrides: PEERLINK_DISPLAY_NAME, PEERLINK_BIND_ADDR, PEERLINK_DISCOVERY_PORT,
/// PEERLINK_VIDEO_PORT, PEERLINK_CONTROL_PORT, PEERLINK_TEXT_PORT, PEERLINK_VOICE_PORT,
/// PEERLINK_CHAT_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name announced to peers and prefixed to sent texts (default: host name).
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Local address every listener binds (default 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Presence announcements go here (default 255.255.255.255).
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: IpAddr,
    /// Presence UDP port (default 5001).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Media TCP port for caller-to-callee streams (default 5003). The return stream uses the next port.
    #[serde(default = "default_video_port")]
    pub video_port: u16,
    /// Call signaling UDP port (default 5005).
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Text UDP port (default 5007).
    #[serde(default = "default_text_port")]
    pub text_port: u16,
    /// Voice mailbox TCP port (default 5009).
    #[serde(default = "default_voice_port")]
    pub voice_port: u16,
    /// Seconds between presence announcements (default 5).
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    /// Connect + write deadline when sending a voice message (default 10).
    #[serde(default = "default_voice_send_timeout_secs")]
    pub voice_send_timeout_secs: u64,
    /// Append-only chat log.
    #[serde(default = "default_chat_log")]
    pub chat_log: PathBuf,
}

fn default_display_name() -> String {
    hostname().unwrap_or_else(|| "peer".to_string())
}
fn default_bind_addr() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_broadcast_addr() -> IpAddr {
    IpAddr::from([255, 255, 255, 255])
}
fn default_discovery_port() -> u16 {
    5001
}
fn default_video_port() -> u16 {
    5003
}
fn default_control_port() -> u16 {
    5005
}
fn default_text_port() -> u16 {
    5007
}
fn default_voice_port() -> u16 {
    5009
}
fn default_announce_interval_secs() -> u64 {
    5
}
fn default_voice_send_timeout_secs() -> u64 {
    10
}
fn default_chat_log() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/peerlink/chat.txt"),
        None => PathBuf::from("chat.txt"),
    }
}

fn hostname() -> Option<String> {
    if let Ok(h) = std::env::var("HOSTNAME") {
        if !h.trim().is_empty() {
            return Some(h.trim().to_string());
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            bind_addr: default_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
            discovery_port: default_discovery_port(),
            video_port: default_video_port(),
            control_port: default_control_port(),
            text_port: default_text_port(),
            voice_port: default_voice_port(),
            announce_interval_secs: default_announce_interval_secs(),
            voice_send_timeout_secs: default_voice_send_timeout_secs(),
            chat_log: default_chat_log(),
        }
    }
}

impl Config {
    /// Port receiving callee-to-caller media streams. 0 (ephemeral) stays 0.
    /// `load` keeps `video_port` below 65535, so this never collides with it.
    pub fn return_video_port(&self) -> u16 {
        if self.video_port == 0 {
            0
        } else {
            self.video_port.saturating_add(1)
        }
    }

    /// Reset values that cannot work to their defaults, with a warning.
    fn validate(&mut self) {
        if self.video_port == u16::MAX {
            tracing::warn!(
                video_port = self.video_port,
                fallback = default_video_port(),
                "video_port leaves no room for the return-video port"
            );
            self.video_port = default_video_port();
        }
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    pub fn voice_send_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_send_timeout_secs)
    }
}

/// Load config: merge default, then config file (explicit path first, if present), then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = load_file(explicit).unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c.validate();
    c
}

fn apply_env<F>(c: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(s) = var("PEERLINK_DISPLAY_NAME") {
        if !s.trim().is_empty() {
            c.display_name = s.trim().to_string();
        }
    }
    if let Some(s) = var("PEERLINK_BIND_ADDR") {
        if let Ok(a) = s.parse::<IpAddr>() {
            c.bind_addr = a;
        }
    }
    let ports: [(&str, &mut u16); 5] = [
        ("PEERLINK_DISCOVERY_PORT", &mut c.discovery_port),
        ("PEERLINK_VIDEO_PORT", &mut c.video_port),
        ("PEERLINK_CONTROL_PORT", &mut c.control_port),
        ("PEERLINK_TEXT_PORT", &mut c.text_port),
        ("PEERLINK_VOICE_PORT", &mut c.voice_port),
    ];
    for (key, port) in ports {
        if let Some(s) = var(key) {
            if let Ok(p) = s.parse::<u16>() {
                *port = p;
            }
        }
    }
    if let Some(s) = var("PEERLINK_CHAT_LOG") {
        if !s.is_empty() {
            c.chat_log = PathBuf::from(s);
        }
    }
}

fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(p) = explicit {
        out.push(p.to_path_buf());
    }
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/peerlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerlink/config.toml"));
    out
}

fn load_file(explicit: Option<&Path>) -> Option<Config> {
    for p in config_paths(explicit) {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
