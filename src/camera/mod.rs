// Camera capture for the operator video feed
//
// A dedicated thread pulls frames from a `FrameSource` and publishes them
// into a `FrameBuffer`. Capture errors never leave the loop: they are logged
// and retried while readers keep getting the last good frame.

mod frame;
mod pattern;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

pub use frame::{Frame, FrameBuffer, FrameSubscriber};
pub use pattern::TestPatternCamera;

/// Back-off after a failed capture
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Unsupported resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Capture failed: {0}")]
    Capture(String),
}

/// Anything that can produce JPEG frames
pub trait FrameSource: Send {
    fn capture(&mut self) -> Result<Vec<u8>, CameraError>;
}

/// Running capture loop; stops the thread when dropped
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Camera capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start capturing at `fps` frames per second into `buffer`
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    buffer: FrameBuffer,
    fps: u32,
) -> std::io::Result<CaptureHandle> {
    let period = Duration::from_secs(1) / fps.max(1);
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);

    let thread = std::thread::Builder::new()
        .name("camera-capture".into())
        .spawn(move || {
            info!("Camera capture started at {} fps", fps);
            while flag.load(Ordering::Relaxed) {
                let started = Instant::now();
                match source.capture() {
                    Ok(jpeg) => {
                        let size = jpeg.len();
                        let seq = buffer.publish(jpeg);
                        debug!("Captured frame {} ({} bytes)", seq, size);
                        if let Some(rest) = period.checked_sub(started.elapsed()) {
                            std::thread::sleep(rest);
                        }
                    }
                    Err(e) => {
                        error!("Camera capture error: {}", e);
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
            info!("Camera capture stopped");
        })?;

    Ok(CaptureHandle {
        running,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails every other capture
    struct FlakySource {
        calls: u32,
    }

    impl FrameSource for FlakySource {
        fn capture(&mut self) -> Result<Vec<u8>, CameraError> {
            self.calls += 1;
            if self.calls % 2 == 1 {
                Err(CameraError::Capture("sensor timeout".into()))
            } else {
                Ok(vec![self.calls as u8; 8])
            }
        }
    }

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn capture(&mut self) -> Result<Vec<u8>, CameraError> {
            Err(CameraError::Capture("no device".into()))
        }
    }

    #[tokio::test]
    async fn test_capture_survives_errors() {
        let buffer = FrameBuffer::new();
        let mut sub = buffer.subscribe();
        let mut handle =
            spawn_capture(Box::new(FlakySource { calls: 0 }), buffer.clone(), 200).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("frame after a failed capture")
            .unwrap();
        assert_eq!(frame.data.len(), 8);
        handle.stop();
    }

    #[test]
    fn test_persistent_failure_keeps_buffer_empty() {
        let buffer = FrameBuffer::new();
        let handle = spawn_capture(Box::new(BrokenSource), buffer.clone(), 30).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(buffer.latest(), None);
        drop(handle);
    }

    #[test]
    fn test_stop_joins_thread() {
        let buffer = FrameBuffer::new();
        let source = TestPatternCamera::new(64, 48, 50).unwrap();
        let mut handle = spawn_capture(Box::new(source), buffer.clone(), 60).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        handle.stop();

        let frame = buffer.latest().expect("at least one frame");
        let after_stop = frame.seq;
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(buffer.latest().unwrap().seq, after_stop);
    }
}
