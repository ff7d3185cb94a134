//! Capture service loop.
//!
//! Drives the [`CaptureEngine`] at a target frame rate across every
//! display the grab backend reports, and delivers [`FrameUpdate`]s
//! over an mpsc channel to the session/routing layer. Diffing and
//! encoding are CPU-bound and run synchronously inside the loop — the
//! service is meant to be spawned on a dedicated Tokio task, never on
//! a UI/dispatch thread.
//!
//! The loop honours per-display FIFO ordering by construction: one
//! capture in flight per display at a time, sequence numbers strictly
//! increasing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::display::DisplayId;
use crate::engine::{CaptureEngine, CaptureResult};
use crate::error::MiraError;
use crate::protocol::FrameUpdate;

// ── CaptureServiceConfig ─────────────────────────────────────────

/// Configuration for [`CaptureService`].
#[derive(Debug, Clone)]
pub struct CaptureServiceConfig {
    /// Target capture rate per display (1..=60).
    pub target_fps: u8,
}

impl Default for CaptureServiceConfig {
    fn default() -> Self {
        Self { target_fps: 30 }
    }
}

impl CaptureServiceConfig {
    pub fn with_fps(mut self, fps: u8) -> Self {
        self.target_fps = fps.clamp(1, 60);
        self
    }
}

// ── CaptureService ───────────────────────────────────────────────

/// Paced capture loop over an engine's display set.
///
/// # Lifetime
///
/// Call [`run`](Self::run) to start the loop. It runs until
/// [`stop`](Self::stop) is signalled (via a [`stop_handle`](Self::stop_handle)
/// from another task) or the update channel closes.
pub struct CaptureService {
    engine: Arc<CaptureEngine>,
    updates: mpsc::Sender<FrameUpdate>,
    running: Arc<AtomicBool>,
    sequences: HashMap<DisplayId, u64>,
    config: CaptureServiceConfig,
}

impl CaptureService {
    /// Create a service delivering updates into `updates`.
    pub fn new(
        engine: Arc<CaptureEngine>,
        updates: mpsc::Sender<FrameUpdate>,
        config: CaptureServiceConfig,
    ) -> Self {
        Self {
            engine,
            updates,
            running: Arc::new(AtomicBool::new(false)),
            sequences: HashMap::new(),
            config,
        }
    }

    /// A cloneable handle that stops the service from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Signal the service to stop after the current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the capture loop.
    pub async fn run(&mut self) -> Result<(), MiraError> {
        self.running.store(true, Ordering::SeqCst);
        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps as f64);
        tracing::debug!(fps = self.config.target_fps, "capture service started");

        while self.running.load(Ordering::SeqCst) {
            let cycle_start = Instant::now();
            if let Err(e) = self.capture_cycle().await {
                // The loop is over; is_running must not claim otherwise.
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
            Self::pace(cycle_start, interval).await;
        }

        tracing::debug!("capture service stopped");
        Ok(())
    }

    /// One pass over every reported display.
    async fn capture_cycle(&mut self) -> Result<(), MiraError> {
        let displays = match self.engine.displays() {
            Ok(d) => d,
            Err(e) => {
                // Display enumeration hiccups (mode switch in progress)
                // are transient; try again next cycle.
                tracing::warn!(error = %e, "display enumeration failed");
                return Ok(());
            }
        };

        for display in displays {
            // `tracing`'s expansion shadows `display` with
            // `field::display`; keep the id in its own binding.
            let display_id = display.id;
            match self.engine.request_capture(display_id, false) {
                Ok(CaptureResult::NoChanges) => {}
                Ok(result) => {
                    let sequence = self.next_sequence(display_id);
                    if let Some(update) = FrameUpdate::from_capture(
                        display_id,
                        sequence,
                        display.width(),
                        display.height(),
                        result,
                    ) {
                        tracing::trace!(
                            display = display_id,
                            sequence,
                            coverage = update.coverage(),
                            "frame update"
                        );
                        // A closed channel means the session is gone;
                        // shut the loop down.
                        self.updates.send(update).await?;
                    }
                }
                Err(e) => {
                    // A failed capture produces no frame this cycle;
                    // a stale view beats corrupted pixels.
                    tracing::warn!(display = display_id, error = %e, "capture failed");
                }
            }
        }
        Ok(())
    }

    fn next_sequence(&mut self, display: DisplayId) -> u64 {
        let seq = self.sequences.entry(display).or_insert(0);
        *seq += 1;
        *seq
    }

    /// Sleep out the remainder of the frame interval.
    async fn pace(cycle_start: Instant, interval: Duration) {
        let elapsed = cycle_start.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayDescriptor;
    use crate::engine::{EngineConfig, GrabOutput, GrabSource};
    use crate::video::frame::RawFrame;

    /// Backend whose single display alternates between two fills, so
    /// every capture after the first produces a delta or keyframe.
    struct BlinkingSource {
        tick: u8,
    }

    impl GrabSource for BlinkingSource {
        fn displays(&mut self) -> Result<Vec<DisplayDescriptor>, MiraError> {
            Ok(vec![DisplayDescriptor {
                id: 7,
                friendly_name: "Blink".into(),
                is_primary: true,
                left: 0,
                top: 0,
                right: 64,
                bottom: 64,
            }])
        }

        fn capture(&mut self, _display: DisplayId) -> Result<GrabOutput, MiraError> {
            self.tick = self.tick.wrapping_add(1);
            let fill = if self.tick % 2 == 0 { 0x00 } else { 0xFF };
            Ok(GrabOutput::full_frame(RawFrame::new_bgra(
                64,
                64,
                vec![fill; 64 * 64 * 4],
            )))
        }
    }

    #[tokio::test]
    async fn service_delivers_sequenced_updates_then_stops() {
        let engine = Arc::new(
            CaptureEngine::new(
                Box::new(BlinkingSource { tick: 0 }),
                EngineConfig::default(),
            )
            .unwrap(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let mut service = CaptureService::new(
            engine,
            tx,
            CaptureServiceConfig::default().with_fps(60),
        );
        let handle = service.stop_handle();

        let worker = tokio::spawn(async move { service.run().await });

        let first = rx.recv().await.expect("first update");
        let second = rx.recv().await.expect("second update");
        assert_eq!(first.display, 7);
        assert_eq!(first.sequence, 1);
        assert!(first.keyframe);
        assert_eq!(second.sequence, 2);

        handle.store(false, Ordering::SeqCst);
        // Drain so the sender never blocks while the loop winds down.
        while rx.recv().await.is_some() {}
        worker.await.unwrap().unwrap();
    }

    /// Backend whose first grab fails, then recovers.
    struct FlakySource {
        attempts: u32,
    }

    impl GrabSource for FlakySource {
        fn displays(&mut self) -> Result<Vec<DisplayDescriptor>, MiraError> {
            Ok(vec![DisplayDescriptor {
                id: 3,
                friendly_name: "Flaky".into(),
                is_primary: true,
                left: 0,
                top: 0,
                right: 64,
                bottom: 64,
            }])
        }

        fn capture(&mut self, _display: DisplayId) -> Result<GrabOutput, MiraError> {
            self.attempts += 1;
            if self.attempts == 1 {
                Err(MiraError::GrabFailed("device lost".into()))
            } else {
                Ok(GrabOutput::full_frame(RawFrame::new_bgra(
                    64,
                    64,
                    vec![0x44; 64 * 64 * 4],
                )))
            }
        }
    }

    #[tokio::test]
    async fn failed_capture_is_skipped_and_the_loop_continues() {
        let engine = Arc::new(
            CaptureEngine::new(Box::new(FlakySource { attempts: 0 }), EngineConfig::default())
                .unwrap(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let mut service = CaptureService::new(
            engine,
            tx,
            CaptureServiceConfig::default().with_fps(60),
        );
        let handle = service.stop_handle();

        let worker = tokio::spawn(async move { service.run().await });

        // The failed first cycle produced no update; the next one did.
        let first = rx.recv().await.expect("recovered update");
        assert_eq!(first.display, 3);
        assert_eq!(first.sequence, 1);
        assert!(first.keyframe);

        handle.store(false, Ordering::SeqCst);
        while rx.recv().await.is_some() {}
        worker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn closed_channel_ends_the_loop_and_clears_running() {
        let engine = Arc::new(
            CaptureEngine::new(
                Box::new(BlinkingSource { tick: 0 }),
                EngineConfig::default(),
            )
            .unwrap(),
        );
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut service = CaptureService::new(engine, tx, CaptureServiceConfig::default());

        assert!(matches!(
            service.run().await,
            Err(MiraError::ChannelClosed)
        ));
        assert!(!service.is_running());
    }

    #[test]
    fn fps_is_clamped() {
        assert_eq!(CaptureServiceConfig::default().with_fps(0).target_fps, 1);
        assert_eq!(CaptureServiceConfig::default().with_fps(200).target_fps, 60);
    }
}
