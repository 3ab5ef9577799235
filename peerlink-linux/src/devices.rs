//! Headless media devices: blank frames and silence at real-time cadence, sinks discard.
//! Used when no capture/playback backend is wired in.

use std::time::Duration;

use async_trait::async_trait;
use peerlink_core::{
    AudioSink, AudioSource, MediaDevices, Result, VideoSink, VideoSource,
};

pub const SAMPLE_RATE: u32 = 44_100;
/// Samples per audio chunk.
pub const CHUNK_SAMPLES: usize = 4096;
/// 16-bit mono.
pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;

const FRAME_INTERVAL: Duration = Duration::from_millis(66);

pub fn chunk_duration() -> Duration {
    Duration::from_micros(CHUNK_SAMPLES as u64 * 1_000_000 / SAMPLE_RATE as u64)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessDevices;

impl MediaDevices for HeadlessDevices {
    fn open_camera(&self) -> Result<Box<dyn VideoSource>> {
        Ok(Box::new(BlankCamera))
    }

    fn open_microphone(&self) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(SilentMicrophone))
    }

    fn open_speaker(&self) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(Discard))
    }

    fn open_display(&self) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(Discard))
    }
}

struct BlankCamera;

#[async_trait]
impl VideoSource for BlankCamera {
    async fn capture(&mut self) -> Result<Vec<u8>> {
        tokio::time::sleep(FRAME_INTERVAL).await;
        Ok(Vec::new())
    }
}

struct SilentMicrophone;

#[async_trait]
impl AudioSource for SilentMicrophone {
    async fn read_chunk(&mut self) -> Result<Vec<u8>> {
        tokio::time::sleep(chunk_duration()).await;
        Ok(vec![0u8; CHUNK_BYTES])
    }
}

struct Discard;

#[async_trait]
impl AudioSink for Discard {
    async fn play(&mut self, _chunk: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl VideoSink for Discard {
    async fn render(&mut self, _frame: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted devices that record what the node does with them.

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct Log {
        pub rendered: Vec<Vec<u8>>,
        pub played: Vec<Vec<u8>>,
        pub camera_released: usize,
        pub mic_stopped: usize,
        pub speaker_stopped: usize,
        pub display_closed: usize,
    }

    /// Devices producing numbered frames/chunks quickly and logging sink activity.
    #[derive(Clone, Default)]
    pub struct RecordingDevices {
        pub log: Arc<Mutex<Log>>,
        /// Chunks the microphone yields before it starts failing. None = unlimited.
        pub mic_script: Option<Vec<Vec<u8>>>,
        /// While set, `open_microphone` fails. Shared by clones.
        pub mic_unavailable: Arc<AtomicBool>,
    }

    impl RecordingDevices {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_mic_script(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                mic_script: Some(chunks),
                ..Self::default()
            }
        }

        pub fn snapshot<T>(&self, f: impl FnOnce(&Log) -> T) -> T {
            f(&self.log.lock().unwrap())
        }
    }

    impl MediaDevices for RecordingDevices {
        fn open_camera(&self) -> Result<Box<dyn VideoSource>> {
            Ok(Box::new(Camera {
                log: self.log.clone(),
                n: 0,
            }))
        }

        fn open_microphone(&self) -> Result<Box<dyn AudioSource>> {
            if self.mic_unavailable.load(Ordering::SeqCst) {
                return Err(peerlink_core::Error::Device("microphone busy".into()));
            }
            Ok(Box::new(Mic {
                log: self.log.clone(),
                script: self.mic_script.clone().map(|v| v.into_iter().collect()),
                n: 0,
            }))
        }

        fn open_speaker(&self) -> Result<Box<dyn AudioSink>> {
            Ok(Box::new(Sink {
                log: self.log.clone(),
            }))
        }

        fn open_display(&self) -> Result<Box<dyn VideoSink>> {
            Ok(Box::new(Sink {
                log: self.log.clone(),
            }))
        }
    }

    struct Camera {
        log: Arc<Mutex<Log>>,
        n: u32,
    }

    #[async_trait]
    impl VideoSource for Camera {
        async fn capture(&mut self) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.n += 1;
            Ok(format!("frame-{}", self.n).into_bytes())
        }

        async fn release(&mut self) {
            self.log.lock().unwrap().camera_released += 1;
        }
    }

    struct Mic {
        log: Arc<Mutex<Log>>,
        script: Option<std::collections::VecDeque<Vec<u8>>>,
        n: u32,
    }

    #[async_trait]
    impl AudioSource for Mic {
        async fn read_chunk(&mut self) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            match &mut self.script {
                Some(script) => script.pop_front().ok_or_else(|| {
                    peerlink_core::Error::Device("microphone script exhausted".into())
                }),
                None => {
                    self.n += 1;
                    Ok(format!("chunk-{}", self.n).into_bytes())
                }
            }
        }

        async fn stop(&mut self) {
            self.log.lock().unwrap().mic_stopped += 1;
        }
    }

    struct Sink {
        log: Arc<Mutex<Log>>,
    }

    #[async_trait]
    impl AudioSink for Sink {
        async fn play(&mut self, chunk: &[u8]) -> Result<()> {
            self.log.lock().unwrap().played.push(chunk.to_vec());
            Ok(())
        }

        async fn stop(&mut self) {
            self.log.lock().unwrap().speaker_stopped += 1;
        }
    }

    #[async_trait]
    impl VideoSink for Sink {
        async fn render(&mut self, frame: &[u8]) -> Result<()> {
            self.log.lock().unwrap().rendered.push(frame.to_vec());
            Ok(())
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().display_closed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silence_chunk_is_full_size() {
        let mut mic = HeadlessDevices.open_microphone().unwrap();
        let chunk = mic.read_chunk().await.unwrap();
        assert_eq!(chunk.len(), CHUNK_BYTES);
        assert!(chunk.iter().all(|b| *b == 0));
    }

    #[test]
    fn chunk_duration_is_real_time() {
        // 4096 samples at 44.1 kHz is just under 93 ms.
        assert_eq!(chunk_duration().as_millis(), 92);
    }
}
