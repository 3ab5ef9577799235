//! Media device seams. Capture and playback hardware are opaque: sources yield encoded video
//! frames and PCM chunks, sinks consume them.

use async_trait::async_trait;

use crate::error::Result;

/// Camera. Frames come out already encoded (one fixed format).
#[async_trait]
pub trait VideoSource: Send {
    async fn capture(&mut self) -> Result<Vec<u8>>;
    /// Release the capture device. Called once when the session tears down.
    async fn release(&mut self) {}
}

/// Microphone.
#[async_trait]
pub trait AudioSource: Send {
    async fn read_chunk(&mut self) -> Result<Vec<u8>>;
    async fn stop(&mut self) {}
}

/// Speaker.
#[async_trait]
pub trait AudioSink: Send {
    async fn play(&mut self, chunk: &[u8]) -> Result<()>;
    async fn stop(&mut self) {}
}

/// Remote video display.
#[async_trait]
pub trait VideoSink: Send {
    async fn render(&mut self, frame: &[u8]) -> Result<()>;
    async fn close(&mut self) {}
}

/// Opens a fresh device handle per call, recording or playback.
pub trait MediaDevices: Send + Sync + 'static {
    fn open_camera(&self) -> Result<Box<dyn VideoSource>>;
    fn open_microphone(&self) -> Result<Box<dyn AudioSource>>;
    fn open_speaker(&self) -> Result<Box<dyn AudioSink>>;
    fn open_display(&self) -> Result<Box<dyn VideoSink>>;
}
