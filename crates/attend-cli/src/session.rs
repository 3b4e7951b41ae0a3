//! Live capture session: camera thread, frame analysis and photo capture.
//!
//! The camera thread publishes every frame into a `watch` channel, so the
//! analyzer always sees the newest frame and never a backlog. The analyzer
//! classifies the best face of each frame and forwards [`Guidance`] to the
//! host over a single-slot channel; results produced while the host is busy
//! are dropped. A photo is taken by parking a `oneshot` sender in the
//! capture slot; the camera thread fills it with the next frame.
//!
//! When the camera stops delivering frames the camera thread exits, which
//! closes the capture slot and, through the analyzer, the guidance channel.

use attend_core::{classify, FaceLocator, FaceStatus, FramingProfile, Guidance};
use attend_hw::photo;
use attend_hw::{Camera, CameraError, Frame, PhotoError};
use image::DynamicImage;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

/// JPEG quality of the raw capture.
const CAPTURE_JPEG_QUALITY: u8 = 95;
/// At most one classification waits for the host.
const GUIDANCE_CHANNEL_SIZE: usize = 1;
/// Consecutive dequeue failures after which the camera is considered gone.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;
const FAILURE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("photo error: {0}")]
    Photo(#[from] PhotoError),
    #[error("a capture is already in flight")]
    CaptureInFlight,
    #[error("capture session closed")]
    Closed,
}

type LatestFrame = Option<Arc<Frame>>;

/// One-shot "first valid frame" flag.
#[derive(Debug, Default)]
pub struct Latch {
    fired: bool,
}

impl Latch {
    /// Returns true exactly once: for the first VALID status since the last re-arm.
    pub fn observe(&mut self, status: FaceStatus) -> bool {
        if self.fired || status != FaceStatus::Valid {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn rearm(&mut self) {
        self.fired = false;
    }
}

/// Single pending photo request. A second request while one is pending is refused.
#[derive(Debug, Default)]
pub struct CaptureSlot {
    state: Mutex<SlotState>,
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<oneshot::Sender<Frame>>,
    closed: bool,
}

impl CaptureSlot {
    pub fn request(&self) -> Result<oneshot::Receiver<Frame>, SessionError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(SessionError::Closed);
        }
        if state.pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(SessionError::CaptureInFlight);
        }
        let (tx, rx) = oneshot::channel();
        state.pending = Some(tx);
        Ok(rx)
    }

    /// Hand `frame` to the pending request, if any. Returns true if delivered.
    pub fn fulfil(&self, frame: &Frame) -> bool {
        let taken = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .take();
        taken.is_some_and(|tx| tx.send(frame.clone()).is_ok())
    }

    /// Refuse further requests and fail the pending one, if any.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.pending = None;
    }
}

/// Counts down the frames discarded while exposure settles.
#[derive(Debug)]
struct Warmup {
    remaining: usize,
}

impl Warmup {
    fn new(frames: usize) -> Self {
        Self { remaining: frames }
    }

    /// True once the warm-up is over and the frame may be published.
    fn admit(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}

/// A running camera + analyzer pair.
pub struct CaptureSession {
    guidance: mpsc::Receiver<Guidance>,
    slot: Arc<CaptureSlot>,
    stop: Arc<AtomicBool>,
    device: String,
}

impl CaptureSession {
    /// Open the camera and start both worker threads.
    ///
    /// Resolves once the camera is open; guidance starts flowing after
    /// `warmup_frames` frames.
    pub async fn start<L>(
        device: &str,
        warmup_frames: usize,
        locator: L,
        profile: FramingProfile,
    ) -> Result<Self, SessionError>
    where
        L: FaceLocator + 'static,
    {
        let (frames_tx, frames_rx) = watch::channel::<LatestFrame>(None);
        let (guidance_tx, guidance) = mpsc::channel(GUIDANCE_CHANNEL_SIZE);
        let slot = Arc::new(CaptureSlot::default());
        let stop = Arc::new(AtomicBool::new(false));
        let (opened_tx, opened_rx) = oneshot::channel();

        spawn_camera(
            device.to_string(),
            warmup_frames,
            frames_tx,
            Arc::clone(&slot),
            Arc::clone(&stop),
            opened_tx,
        );
        opened_rx.await.map_err(|_| SessionError::Closed)??;

        spawn_analyzer(frames_rx, locator, profile, guidance_tx, Handle::current());

        Ok(Self {
            guidance,
            slot,
            stop,
            device: device.to_string(),
        })
    }

    /// Next classified frame, or `None` once the session has stopped.
    pub async fn next_guidance(&mut self) -> Option<Guidance> {
        self.guidance.recv().await
    }

    /// Drop guidance produced while the host was busy with a capture.
    pub fn discard_pending_guidance(&mut self) -> usize {
        drain(&mut self.guidance)
    }

    /// Grab the next camera frame.
    pub async fn capture(&self) -> Result<Frame, SessionError> {
        let rx = self.slot.request()?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Capture a frame and write it to `path` as JPEG.
    pub async fn take_picture(&self, path: &Path) -> Result<(), SessionError> {
        let frame = self.capture().await?;
        photo::save_jpeg(&DynamicImage::ImageLuma8(frame.image), path, CAPTURE_JPEG_QUALITY)?;
        tracing::info!(path = %path.display(), seq = frame.sequence, "capture saved");
        Ok(())
    }

    /// Stop the camera; the analyzer follows once the frame channel closes.
    pub fn close(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            tracing::info!(device = %self.device, "closing capture session");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_camera(
    device: String,
    warmup_frames: usize,
    frames: watch::Sender<LatestFrame>,
    slot: Arc<CaptureSlot>,
    stop: Arc<AtomicBool>,
    opened: oneshot::Sender<Result<(), CameraError>>,
) {
    std::thread::Builder::new()
        .name("attend-camera".into())
        .spawn(move || {
            let camera = match Camera::open(&device) {
                Ok(camera) => camera,
                Err(e) => {
                    let _ = opened.send(Err(e));
                    return;
                }
            };
            let mut stream = match camera.stream() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = opened.send(Err(e));
                    return;
                }
            };
            let _ = opened.send(Ok(()));

            run_capture(|| stream.next_frame(), warmup_frames, frames, &slot, &stop);
            tracing::info!(device = %device, "camera thread exiting");
        })
        .expect("failed to spawn camera thread");
}

/// Publish frames from `next_frame` until `stop` is set or the source keeps
/// failing. Closes the capture slot and the frame channel on return.
fn run_capture<F>(
    mut next_frame: F,
    warmup_frames: usize,
    frames: watch::Sender<LatestFrame>,
    slot: &CaptureSlot,
    stop: &AtomicBool,
) where
    F: FnMut() -> Result<Frame, CameraError>,
{
    let mut warmup = Warmup::new(warmup_frames);
    let mut ready = false;
    let mut failures = 0u32;

    while !stop.load(Ordering::SeqCst) {
        let frame = match next_frame() {
            Ok(frame) => {
                failures = 0;
                frame
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(error = %e, failures, "camera stopped delivering frames");
                    break;
                }
                tracing::warn!(error = %e, failures, "frame capture failed");
                std::thread::sleep(FAILURE_BACKOFF);
                continue;
            }
        };
        if !warmup.admit() {
            tracing::debug!(seq = frame.sequence, "discarding warmup frame");
            continue;
        }
        if !ready {
            tracing::info!(seq = frame.sequence, "camera ready");
            ready = true;
        }

        slot.fulfil(&frame);
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "dark frame");
        }
        frames.send_replace(Some(Arc::new(frame)));
    }

    slot.close();
}

/// Classify the newest frame whenever it changes and forward the guidance.
fn spawn_analyzer<L>(
    mut frames: watch::Receiver<LatestFrame>,
    mut locator: L,
    profile: FramingProfile,
    guidance: mpsc::Sender<Guidance>,
    runtime: Handle,
) where
    L: FaceLocator + 'static,
{
    std::thread::Builder::new()
        .name("attend-analyzer".into())
        .spawn(move || {
            while runtime.block_on(frames.changed()).is_ok() {
                let Some(frame) = frames.borrow_and_update().clone() else {
                    continue;
                };
                let Some(result) = analyze(&mut locator, &frame, &profile) else {
                    continue;
                };
                tracing::debug!(seq = frame.sequence, status = ?result.status, "frame classified");
                match guidance.try_send(result) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::trace!(seq = frame.sequence, "host busy, guidance dropped");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            tracing::info!("analyzer thread exiting");
        })
        .expect("failed to spawn analyzer thread");
}

fn drain(guidance: &mut mpsc::Receiver<Guidance>) -> usize {
    let mut dropped = 0;
    while guidance.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}

/// Guidance for the best face in the frame; `None` when there is no face.
fn analyze<L: FaceLocator>(locator: &mut L, frame: &Frame, profile: &FramingProfile) -> Option<Guidance> {
    let faces = match locator.locate(&frame.image) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed");
            return None;
        }
    };
    let face = faces.first()?;
    let status = classify(face, frame.width(), frame.height(), profile);
    Some(Guidance::from(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_core::{BoundingBox, DetectorError};
    use image::GrayImage;

    struct FixedLocator(Vec<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _image: &image::GrayImage) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn frame(seq: u32) -> Frame {
        Frame::new(GrayImage::new(640, 480), seq)
    }

    #[test]
    fn test_latch_fires_once() {
        let mut latch = Latch::default();
        assert!(!latch.observe(FaceStatus::TooFar));
        assert!(!latch.observe(FaceStatus::NotCentered));
        assert!(latch.observe(FaceStatus::Valid));
        assert!(!latch.observe(FaceStatus::Valid));
        assert!(!latch.observe(FaceStatus::Valid));

        latch.rearm();
        assert!(!latch.observe(FaceStatus::NotCentered));
        assert!(latch.observe(FaceStatus::Valid));
    }

    #[tokio::test]
    async fn test_second_capture_request_is_rejected() {
        let slot = CaptureSlot::default();
        let rx = slot.request().unwrap();
        assert!(matches!(slot.request(), Err(SessionError::CaptureInFlight)));

        assert!(slot.fulfil(&frame(9)));
        assert_eq!(rx.await.unwrap().sequence, 9);

        // Slot is free again once fulfilled.
        assert!(slot.request().is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_request_frees_slot() {
        let slot = CaptureSlot::default();
        drop(slot.request().unwrap());
        assert!(slot.request().is_ok());
    }

    #[test]
    fn test_closed_slot_fails_pending_and_new_requests() {
        let slot = CaptureSlot::default();
        let mut rx = slot.request().unwrap();
        slot.close();
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(matches!(slot.request(), Err(SessionError::Closed)));
        assert!(!slot.fulfil(&frame(1)));
    }

    #[test]
    fn test_warmup_admits_after_count() {
        let mut warmup = Warmup::new(2);
        assert!(!warmup.admit());
        assert!(!warmup.admit());
        assert!(warmup.admit());
        assert!(warmup.admit());

        assert!(Warmup::new(0).admit());
    }

    #[test]
    fn test_capture_loop_publishes_after_warmup() {
        let (frames_tx, frames_rx) = watch::channel::<LatestFrame>(None);
        let slot = CaptureSlot::default();
        let mut rx = slot.request().unwrap();
        let stop = AtomicBool::new(false);

        let mut seq = 0;
        let source = || {
            seq += 1;
            if seq == 5 {
                stop.store(true, Ordering::SeqCst);
            }
            Ok(frame(seq))
        };
        run_capture(source, 3, frames_tx, &slot, &stop);

        // Frames 1-3 are warm-up; the pending capture gets the first real one.
        assert_eq!(rx.try_recv().unwrap().sequence, 4);
        let latest = frames_rx.borrow().clone();
        assert_eq!(latest.map(|f| f.sequence), Some(5));
        assert!(frames_rx.has_changed().is_err());
    }

    #[test]
    fn test_capture_loop_gives_up_on_dead_camera() {
        let (frames_tx, frames_rx) = watch::channel::<LatestFrame>(None);
        let slot = CaptureSlot::default();
        let mut rx = slot.request().unwrap();
        let stop = AtomicBool::new(false);

        let mut calls = 0;
        let source = || {
            calls += 1;
            Err(CameraError::CaptureFailed("device unplugged".into()))
        };
        run_capture(source, 0, frames_tx, &slot, &stop);

        assert_eq!(calls, MAX_CONSECUTIVE_FAILURES);
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
        assert!(matches!(slot.request(), Err(SessionError::Closed)));
        assert!(frames_rx.has_changed().is_err());
    }

    #[test]
    fn test_fulfil_without_request() {
        let slot = CaptureSlot::default();
        assert!(!slot.fulfil(&frame(1)));
    }

    #[test]
    fn test_analyze_classifies_best_face() {
        let centered = BoundingBox::new(220.0, 140.0, 200.0, 200.0);
        let mut locator = FixedLocator(vec![centered, BoundingBox::new(0.0, 0.0, 5.0, 5.0)]);
        let g = analyze(&mut locator, &frame(1), &FramingProfile::ENROLLMENT).unwrap();
        assert_eq!(g.status, FaceStatus::Valid);

        let mut empty = FixedLocator(vec![]);
        assert!(analyze(&mut empty, &frame(1), &FramingProfile::ENROLLMENT).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_analyzer_forwards_latest_frame() {
        let (frames_tx, frames_rx) = watch::channel::<LatestFrame>(None);
        let (guidance_tx, mut guidance_rx) = mpsc::channel(4);
        let locator = FixedLocator(vec![BoundingBox::new(315.0, 235.0, 10.0, 10.0)]);
        spawn_analyzer(frames_rx, locator, FramingProfile::DEFAULT, guidance_tx, Handle::current());

        frames_tx.send_replace(Some(Arc::new(frame(1))));
        let g = guidance_rx.recv().await.unwrap();
        assert_eq!(g.status, FaceStatus::TooFar);

        // Closing the frame channel stops the analyzer.
        drop(frames_tx);
        assert!(guidance_rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_host_sees_no_stale_guidance_after_drain() {
        let (frames_tx, frames_rx) = watch::channel::<LatestFrame>(None);
        let (guidance_tx, mut guidance_rx) = mpsc::channel(GUIDANCE_CHANNEL_SIZE);
        let centered = BoundingBox::new(220.0, 140.0, 200.0, 200.0);
        spawn_analyzer(
            frames_rx,
            FixedLocator(vec![centered]),
            FramingProfile::ENROLLMENT,
            guidance_tx,
            Handle::current(),
        );

        // The host is not reading while these frames are classified.
        for seq in 1..=6 {
            frames_tx.send_replace(Some(Arc::new(frame(seq))));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(drain(&mut guidance_rx), 1);

        // Nothing classified before the drain arrives afterwards.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guidance_rx.try_recv().is_err());

        frames_tx.send_replace(Some(Arc::new(frame(7))));
        let g = tokio::time::timeout(Duration::from_secs(1), guidance_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(g.status, FaceStatus::Valid);
    }
}
