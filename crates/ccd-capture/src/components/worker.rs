//! Dedicated streaming thread.
//!
//! One worker runs per connected camera for the lifetime of the connection.
//! It shares exactly one structure with the tick loop, [`StreamControl`],
//! guarded by one mutex and signalled through one condition variable:
//!
//! ```text
//!   tick loop                          worker thread
//!   ─────────                          ─────────────
//!   start(settings) ──┐
//!                     ├─► stream_requested = true ─► wakes, state = Streaming
//!                     │                              unlock; read_video_frame
//!   take_frames() ◄───┼── pending.push_back(frame) ◄ relock
//!   stop()  ──────────┼─► stream_requested = false ─► finishes read, state = Idle
//!   terminate() ──────┴─► terminate = true ────────► exits, state = Terminated
//! ```
//!
//! The blocking read always happens with the mutex released, and every read
//! carries a timeout, so a stop request takes effect within one read
//! timeout.

use super::compression::FrameCompressor;
use ccd_core::{
    CaptureConfig, CaptureError, DeviceIO, FrameBuffer, FrameLayout, Result, SharedDevice,
    StreamFrame,
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, trace, warn};

/// Lifecycle of the streaming thread as last reported by the thread itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureThreadState {
    /// Waiting for a start request.
    Idle,
    /// Reading frames.
    Streaming,
    /// Shutdown requested; the thread is on its way out.
    Terminating,
    /// Thread exited; the worker cannot be restarted.
    Terminated,
}

/// Parameters the worker reads before every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSettings {
    /// Geometry of each frame.
    pub layout: FrameLayout,
    /// Per-frame exposure; also sizes the read timeout.
    pub exposure_s: f64,
    /// Compress frames before queueing them.
    pub compress: bool,
    /// zlib level used when compressing.
    pub compression_level: u32,
    /// Frames kept for the tick loop before the oldest is dropped.
    pub queue_depth: usize,
    /// Consecutive read failures tolerated before the stream gives up.
    pub max_retries: u8,
}

/// Streaming counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Frames delivered to the queue.
    pub frames_captured: u64,
    /// Frames discarded because the queue was full.
    pub frames_dropped: u64,
    /// Reads that hit the timeout.
    pub timeouts: u64,
    /// Reads that failed with a device error.
    pub read_errors: u64,
}

#[derive(Debug)]
struct StreamControl {
    state: CaptureThreadState,
    stream_requested: bool,
    terminate: bool,
    settings: Option<StreamSettings>,
    pending: VecDeque<StreamFrame>,
    failure: Option<String>,
    stats: StreamStats,
}

#[derive(Debug)]
struct Shared {
    control: Mutex<StreamControl>,
    signal: Condvar,
}

/// Handle to one camera's streaming thread.
pub struct AcquisitionWorker {
    camera: String,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl AcquisitionWorker {
    /// Spawn the worker thread. It idles until [`start`](Self::start).
    pub fn spawn(camera: &str, device: SharedDevice) -> Result<Self> {
        let shared = Arc::new(Shared {
            control: Mutex::new(StreamControl {
                state: CaptureThreadState::Idle,
                stream_requested: false,
                terminate: false,
                settings: None,
                pending: VecDeque::new(),
                failure: None,
                stats: StreamStats::default(),
            }),
            signal: Condvar::new(),
        });

        let thread = thread::Builder::new()
            .name(format!("ccd-stream-{}", camera))
            .spawn({
                let shared = shared.clone();
                let camera = camera.to_string();
                move || stream_loop(&camera, &shared, device.as_ref())
            })
            .map_err(|e| {
                error!(camera, error = %e, "Failed to spawn stream thread");
                CaptureError::ResourceExhausted {
                    what: "stream thread",
                    bytes: 0,
                }
            })?;
        let thread_id = thread.thread().id();
        debug!(camera, "Stream worker spawned");

        Ok(Self {
            camera: camera.to_string(),
            shared,
            thread: Some(thread),
            thread_id,
        })
    }

    /// Request streaming with `settings`. Clears frames and errors left over
    /// from the previous run.
    pub fn start(&self, settings: StreamSettings) -> Result<()> {
        let mut control = self.shared.control.lock();
        if control.terminate {
            return Err(CaptureError::NotConnected);
        }
        control.settings = Some(settings);
        control.stream_requested = true;
        control.failure = None;
        control.pending.clear();
        self.shared.signal.notify_all();
        info!(
            camera = %self.camera,
            exposure_s = settings.exposure_s,
            compress = settings.compress,
            "Stream requested"
        );
        Ok(())
    }

    /// Ask the worker to go idle once its current read returns.
    pub fn stop(&self) {
        let mut control = self.shared.control.lock();
        control.stream_requested = false;
        control.pending.clear();
        self.shared.signal.notify_all();
        info!(camera = %self.camera, "Stream stop requested");
    }

    /// Replace settings without interrupting the stream. Takes effect on the
    /// next frame.
    pub fn update_settings(&self, settings: StreamSettings) {
        let mut control = self.shared.control.lock();
        control.settings = Some(settings);
    }

    /// Whether streaming is currently requested.
    pub fn is_requested(&self) -> bool {
        self.shared.control.lock().stream_requested
    }

    /// State last reported by the worker thread.
    pub fn state(&self) -> CaptureThreadState {
        self.shared.control.lock().state
    }

    /// Block until the worker reports `target` or `timeout` passes.
    pub fn wait_for_state(&self, target: CaptureThreadState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut control = self.shared.control.lock();
        while control.state != target {
            if self
                .shared
                .signal
                .wait_until(&mut control, deadline)
                .timed_out()
            {
                return control.state == target;
            }
        }
        true
    }

    /// Hand every captured frame over to the caller.
    pub fn take_frames(&self) -> Vec<StreamFrame> {
        self.shared.control.lock().pending.drain(..).collect()
    }

    /// Reason the worker gave up streaming, if it did.
    pub fn take_failure(&self) -> Option<String> {
        self.shared.control.lock().failure.take()
    }

    /// Counters since the worker was spawned.
    pub fn stats(&self) -> StreamStats {
        self.shared.control.lock().stats
    }

    /// Identity of the worker thread, stable for the connection.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Stop the thread and join it. Idempotent.
    pub fn terminate(&mut self) {
        {
            let mut control = self.shared.control.lock();
            control.terminate = true;
            control.stream_requested = false;
            if control.state != CaptureThreadState::Terminated {
                control.state = CaptureThreadState::Terminating;
            }
            self.shared.signal.notify_all();
        }

        if let Some(handle) = self.thread.take() {
            if let Err(e) = handle.join() {
                error!(camera = %self.camera, "Stream thread panicked: {:?}", e);
            }
            info!(camera = %self.camera, "Stream worker terminated");
        }
    }
}

impl Drop for AcquisitionWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn stream_loop(camera: &str, shared: &Shared, device: &dyn DeviceIO) {
    let span = info_span!("ccd_stream", camera);
    let _enter = span.enter();

    let mut frame_slot: Option<FrameBuffer> = None;
    let mut compressor: Option<FrameCompressor> = None;
    let mut sequence = 0u64;
    let mut consecutive_errors = 0u8;

    let mut control = shared.control.lock();
    loop {
        while !control.stream_requested && !control.terminate {
            if control.state != CaptureThreadState::Idle {
                control.state = CaptureThreadState::Idle;
                shared.signal.notify_all();
                debug!("Stream idle");
            }
            shared.signal.wait(&mut control);
        }
        if control.terminate {
            break;
        }
        let Some(settings) = control.settings else {
            warn!("Stream requested without settings");
            control.stream_requested = false;
            continue;
        };
        if control.state != CaptureThreadState::Streaming {
            control.state = CaptureThreadState::Streaming;
            shared.signal.notify_all();
            consecutive_errors = 0;
            sequence = 0;
            info!(
                width = settings.layout.binned_width(),
                height = settings.layout.binned_height(),
                "Streaming started"
            );
        }

        let outcome = MutexGuard::unlocked(&mut control, || {
            capture_one(device, &settings, &mut frame_slot, &mut compressor, &mut sequence)
        });

        match outcome {
            Ok(frame) => {
                consecutive_errors = 0;
                control.stats.frames_captured += 1;
                if !control.stream_requested {
                    trace!(sequence = frame.sequence, "Discarding frame read across a stop");
                    continue;
                }
                if control.pending.len() >= settings.queue_depth.max(1) {
                    control.pending.pop_front();
                    control.stats.frames_dropped += 1;
                    trace!("Handoff queue full, dropped oldest frame");
                }
                control.pending.push_back(frame);
            }
            Err(CaptureError::ProtocolTimeout { waited_ms, .. }) => {
                control.stats.timeouts += 1;
                trace!(waited_ms, "Video read timed out");
            }
            Err(e) if e.is_transient() && consecutive_errors + 1 < settings.max_retries => {
                consecutive_errors += 1;
                control.stats.read_errors += 1;
                warn!(attempt = consecutive_errors, error = %e, "Video read failed, retrying");
            }
            Err(e) => {
                control.stats.read_errors += 1;
                error!(error = %e, "Streaming stopped after read failure");
                control.stream_requested = false;
                control.failure = Some(e.to_string());
            }
        }
    }

    control.state = CaptureThreadState::Terminated;
    shared.signal.notify_all();
    debug!("Stream thread exiting");
}

/// Read one frame into the reusable buffer and package it for handoff.
fn capture_one(
    device: &dyn DeviceIO,
    settings: &StreamSettings,
    slot: &mut Option<FrameBuffer>,
    compressor: &mut Option<FrameCompressor>,
    sequence: &mut u64,
) -> Result<StreamFrame> {
    let frame = match slot.take() {
        Some(frame) if frame.matches(&settings.layout) => slot.insert(frame),
        _ => slot.insert(FrameBuffer::allocate(&settings.layout)?),
    };

    device.read_video_frame(
        frame.payload_mut(),
        CaptureConfig::video_timeout(settings.exposure_s),
    )?;
    *sequence += 1;

    let (width, height) = (frame.width, frame.height);
    let (bits_per_pixel, channels) = (frame.bits_per_pixel, frame.channels);
    let data = if settings.compress {
        let engine = match compressor.take() {
            Some(engine) if engine.level() == settings.compression_level => {
                compressor.insert(engine)
            }
            _ => compressor.insert(FrameCompressor::new(settings.compression_level)),
        };
        engine.compress(frame.payload())?.to_vec()
    } else {
        // Raw frames move out whole; the next read allocates a fresh buffer.
        let payload_len = frame.payload().len();
        let mut bytes = slot.take().map(FrameBuffer::into_bytes).unwrap_or_default();
        bytes.truncate(payload_len);
        bytes
    };

    Ok(StreamFrame {
        sequence: *sequence,
        width,
        height,
        bits_per_pixel,
        channels,
        compressed: settings.compress,
        data,
        captured_at: Instant::now(),
    })
}
