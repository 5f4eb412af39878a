use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::AudioFrame;
use crate::error::{PipelineError, Result};

/// An opened input device delivering mono samples
pub trait InputDevice: Send {
    fn sample_rate(&self) -> u32;

    /// Block until one buffer is delivered.
    ///
    /// Only channel 0 is written into `buf`. Returns the number of valid
    /// samples, which may be less than `buf.len()`.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize>;
}

/// Opens input devices for capture sessions
pub trait AudioBackend: Send {
    fn name(&self) -> String;

    /// Configure and activate the device for buffers of `frame_len` samples
    fn open(&mut self, frame_len: usize) -> Result<Box<dyn InputDevice>>;
}

/// Receives every captured frame, inline on the capture thread
pub trait FrameSink: Send + 'static {
    fn on_frame(&mut self, frame: AudioFrame) -> Result<()>;

    /// Called once when a session ends with a failure
    fn on_terminated(&mut self, error: PipelineError);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Starting,
    Running,
}

/// Shortest time `stop()` waits for the session thread
const STOP_GRACE: Duration = Duration::from_millis(250);

/// Frame periods `stop()` waits before declaring the device stalled
const STOP_GRACE_PERIODS: u32 = 4;

struct Session<S> {
    thread: thread::JoinHandle<()>,
    done: mpsc::Receiver<SessionEnd<S>>,
    stop_flag: Arc<AtomicBool>,
    grace: Duration,
}

struct SessionEnd<S> {
    sink: S,
    error: Option<PipelineError>,
    frames: u64,
    overruns: u64,
}

/// Owns the device subscription and runs analysis inline per frame
///
/// At most one session exists at a time: `start()` on a running loop stops
/// the old session (joining its thread) before opening the device again.
///
/// A device whose read never returns is abandoned by `stop()` after a grace
/// period. The sink comes back if that read ever finishes.
pub struct AudioCaptureLoop<S: FrameSink> {
    backend: Box<dyn AudioBackend>,
    // Moved into the session thread while running, returned on join
    sink: Option<S>,
    frame_len: usize,
    session: Option<Session<S>>,
    // Exit channel of a session abandoned on a stalled read
    stalled: Option<mpsc::Receiver<SessionEnd<S>>>,
    state: Arc<watch::Sender<CaptureState>>,
    last_error: Option<PipelineError>,
}

impl<S: FrameSink> AudioCaptureLoop<S> {
    pub fn new(backend: Box<dyn AudioBackend>, sink: S, frame_len: usize) -> Self {
        let (state, _) = watch::channel(CaptureState::Stopped);
        Self {
            backend,
            sink: Some(sink),
            frame_len,
            session: None,
            stalled: None,
            state: Arc::new(state),
            last_error: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == CaptureState::Running
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    /// The sink, available while no session holds it
    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    /// Most recent failure, collecting it from a session that already died
    pub fn last_error(&mut self) -> Option<&PipelineError> {
        let finished = self
            .session
            .as_ref()
            .map(|s| s.thread.is_finished())
            .unwrap_or(false);
        if finished {
            self.stop();
        }
        self.last_error.as_ref()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            info!("Capture already active, restarting session");
            self.stop();
        }

        self.reclaim_stalled();
        let sink = self.sink.take().ok_or_else(|| {
            PipelineError::Device(if self.stalled.is_some() {
                "previous capture session is still stalled".into()
            } else {
                "capture sink was lost".into()
            })
        })?;

        self.state.send_replace(CaptureState::Starting);
        let device = match self.backend.open(self.frame_len) {
            Ok(device) => device,
            Err(e) => {
                warn!("Failed to open {}: {}", self.backend.name(), e);
                self.sink = Some(sink);
                self.last_error = Some(e.clone());
                self.state.send_replace(CaptureState::Stopped);
                return Err(e);
            }
        };

        info!(
            "Capturing from {} at {} Hz, {} samples per frame",
            self.backend.name(),
            device.sample_rate(),
            self.frame_len
        );

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();
        let thread_state = self.state.clone();
        let frame_len = self.frame_len;
        let period = frame_period(frame_len, device.sample_rate());
        let grace = (period * STOP_GRACE_PERIODS).max(STOP_GRACE);
        let (done_tx, done) = mpsc::channel();

        self.last_error = None;
        // Running before spawn so an immediate failure can't be overwritten
        self.state.send_replace(CaptureState::Running);

        let spawned = thread::Builder::new()
            .name("soundscape-capture".into())
            .spawn(move || {
                let end = run_session(device, sink, frame_len, thread_stop, thread_state);
                // Nobody is listening once the loop itself is gone
                let _ = done_tx.send(end);
            });

        match spawned {
            Ok(thread) => {
                self.session = Some(Session {
                    thread,
                    done,
                    stop_flag,
                    grace,
                });
                Ok(())
            }
            Err(e) => {
                let err = PipelineError::Device(format!("failed to spawn capture thread: {}", e));
                self.last_error = Some(err.clone());
                self.state.send_replace(CaptureState::Stopped);
                Err(err)
            }
        }
    }

    /// Stop the session and wait for its thread.
    ///
    /// No frame reaches the sink after this returns. Calling it while
    /// stopped is a no-op. A read that does not return within a few frame
    /// periods is treated as a stalled device: the thread is detached and
    /// the stall is recorded as a terminal stream error.
    pub fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop_flag.store(true, Ordering::Release);
            match session.done.recv_timeout(session.grace) {
                Ok(end) => {
                    let _ = session.thread.join();
                    info!(
                        "Capture session ended after {} frames ({} deadline overruns)",
                        end.frames, end.overruns
                    );
                    if end.error.is_some() {
                        self.last_error = end.error;
                    }
                    self.sink = Some(end.sink);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    error!(
                        "Input device did not return within {:?}, abandoning capture thread",
                        session.grace
                    );
                    self.last_error = Some(PipelineError::StreamTerminated(
                        "input device stalled".into(),
                    ));
                    self.stalled = Some(session.done);
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let _ = session.thread.join();
                    error!("Capture thread panicked");
                    self.last_error = Some(PipelineError::StreamTerminated(
                        "capture thread panicked".into(),
                    ));
                }
            }
        }
        self.state.send_replace(CaptureState::Stopped);
    }

    /// Take the sink back from an abandoned session whose read has returned
    fn reclaim_stalled(&mut self) {
        if let Some(done) = &self.stalled {
            match done.try_recv() {
                Ok(end) => {
                    info!("Stalled capture session finally ended");
                    self.sink = Some(end.sink);
                    self.stalled = None;
                }
                Err(mpsc::TryRecvError::Empty) => {}
                Err(mpsc::TryRecvError::Disconnected) => self.stalled = None,
            }
        }
    }
}

fn frame_period(frame_len: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(frame_len as f64 / sample_rate.max(1) as f64)
}

impl<S: FrameSink> Drop for AudioCaptureLoop<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_session<S: FrameSink>(
    mut device: Box<dyn InputDevice>,
    mut sink: S,
    frame_len: usize,
    stop_flag: Arc<AtomicBool>,
    state: Arc<watch::Sender<CaptureState>>,
) -> SessionEnd<S> {
    let sample_rate = device.sample_rate();
    let period = frame_period(frame_len, sample_rate);
    let mut frames = 0u64;
    let mut overruns = 0u64;

    let error = loop {
        if stop_flag.load(Ordering::Acquire) {
            debug!("Stop flag set, ending capture loop");
            break None;
        }

        // Read straight into the frame's own storage
        let mut samples = vec![0.0f32; frame_len];
        let delivered = match device.read(&mut samples) {
            Ok(n) => n.min(frame_len),
            Err(e) => {
                error!("Input device failed: {}", e);
                break Some(match e {
                    PipelineError::StreamTerminated(_) => e,
                    other => PipelineError::StreamTerminated(other.to_string()),
                });
            }
        };

        // A read that finished while stop() was waiting is dropped
        if stop_flag.load(Ordering::Acquire) {
            break None;
        }

        let captured_at = Instant::now();
        samples.truncate(delivered);
        let frame = AudioFrame::padded(samples, frame_len, sample_rate, captured_at, frames);
        frames += 1;

        if let Err(e) = sink.on_frame(frame) {
            error!("Frame processing failed: {}", e);
            break Some(e);
        }

        let elapsed = captured_at.elapsed();
        if elapsed > period {
            overruns += 1;
            warn!(
                "Analysis took {:?}, over the {:?} frame period ({} overruns)",
                elapsed, period, overruns
            );
        }
    };

    // Release the device before reporting
    drop(device);

    if let Some(e) = &error {
        sink.on_terminated(e.clone());
        state.send_replace(CaptureState::Stopped);
    }

    SessionEnd {
        sink,
        error,
        frames,
        overruns,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Counters {
        opens: Arc<AtomicUsize>,
        live: Arc<AtomicUsize>,
        max_live: Arc<AtomicUsize>,
        fail_open: Arc<AtomicBool>,
        // Reads past `stall_after` block while this is set
        hold: Arc<AtomicBool>,
    }

    struct FakeBackend {
        counters: Counters,
        fail_after: Option<u64>,
        stall_after: Option<u64>,
        short_reads: bool,
    }

    impl FakeBackend {
        fn new(counters: Counters) -> Self {
            Self {
                counters,
                fail_after: None,
                stall_after: None,
                short_reads: false,
            }
        }
    }

    impl AudioBackend for FakeBackend {
        fn name(&self) -> String {
            "fake".into()
        }

        fn open(&mut self, _frame_len: usize) -> Result<Box<dyn InputDevice>> {
            if self.counters.fail_open.load(Ordering::SeqCst) {
                return Err(PipelineError::Device("no such device".into()));
            }
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(Box::new(FakeDevice {
                live: self.counters.live.clone(),
                reads: 0,
                fail_after: self.fail_after,
                stall_after: self.stall_after,
                hold: self.counters.hold.clone(),
                short_reads: self.short_reads,
            }))
        }
    }

    struct FakeDevice {
        live: Arc<AtomicUsize>,
        reads: u64,
        fail_after: Option<u64>,
        stall_after: Option<u64>,
        hold: Arc<AtomicBool>,
        short_reads: bool,
    }

    impl InputDevice for FakeDevice {
        fn sample_rate(&self) -> u32 {
            44100
        }

        fn read(&mut self, buf: &mut [f32]) -> Result<usize> {
            thread::sleep(Duration::from_millis(1));
            if Some(self.reads) == self.fail_after {
                return Err(PipelineError::Device("unplugged".into()));
            }
            if Some(self.reads) == self.stall_after {
                while self.hold.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            self.reads += 1;
            buf.fill(0.25);
            Ok(if self.short_reads { buf.len() / 2 } else { buf.len() })
        }
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<(u64, usize, f32)>>>,
        terminated: Arc<Mutex<Option<PipelineError>>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl FrameSink for RecordingSink {
        fn on_frame(&mut self, frame: AudioFrame) -> Result<()> {
            let last = frame.samples().last().copied().unwrap_or_default();
            self.frames
                .lock()
                .unwrap()
                .push((frame.sequence(), frame.len(), last));
            Ok(())
        }

        fn on_terminated(&mut self, error: PipelineError) {
            *self.terminated.lock().unwrap() = Some(error);
        }
    }

    fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_start_stop_transitions() {
        let counters = Counters::default();
        let sink = RecordingSink::default();
        let mut capture =
            AudioCaptureLoop::new(Box::new(FakeBackend::new(counters.clone())), sink.clone(), 64);

        assert_eq!(capture.state(), CaptureState::Stopped);
        capture.start().unwrap();
        assert_eq!(capture.state(), CaptureState::Running);
        assert!(wait_for(|| sink.count() >= 3));

        capture.stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
        assert!(capture.sink().is_some());

        let after_stop = sink.count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.count(), after_stop);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let sink = RecordingSink::default();
        let mut capture = AudioCaptureLoop::new(
            Box::new(FakeBackend::new(Counters::default())),
            sink.clone(),
            64,
        );

        capture.stop();
        capture.start().unwrap();
        capture.stop();
        let frozen = sink.count();
        capture.stop();

        assert_eq!(capture.state(), CaptureState::Stopped);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.count(), frozen);
        assert!(capture.last_error().is_none());
    }

    #[test]
    fn test_restart_keeps_single_session() {
        let counters = Counters::default();
        let sink = RecordingSink::default();
        let mut capture =
            AudioCaptureLoop::new(Box::new(FakeBackend::new(counters.clone())), sink.clone(), 64);

        capture.start().unwrap();
        assert!(wait_for(|| sink.count() >= 3));
        capture.start().unwrap();
        let before = sink.count();
        assert!(wait_for(|| sink.count() >= before + 3));
        capture.stop();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.max_live.load(Ordering::SeqCst), 1);

        // Sequence numbers restart exactly once and never interleave
        let frames = sink.frames.lock().unwrap();
        let restarts = frames
            .windows(2)
            .filter(|pair| pair[1].0 != pair[0].0 + 1)
            .count();
        assert_eq!(restarts, 1);
        assert!(frames
            .windows(2)
            .all(|pair| pair[1].0 == pair[0].0 + 1 || pair[1].0 == 0));
    }

    #[test]
    fn test_open_failure_reports_device_error() {
        let counters = Counters::default();
        counters.fail_open.store(true, Ordering::SeqCst);
        let mut capture = AudioCaptureLoop::new(
            Box::new(FakeBackend::new(counters.clone())),
            RecordingSink::default(),
            64,
        );

        assert!(matches!(capture.start(), Err(PipelineError::Device(_))));
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert!(capture.sink().is_some());

        counters.fail_open.store(false, Ordering::SeqCst);
        capture.start().unwrap();
        assert!(capture.is_running());
    }

    #[test]
    fn test_read_failure_terminates_stream() {
        let sink = RecordingSink::default();
        let mut backend = FakeBackend::new(Counters::default());
        backend.fail_after = Some(2);
        let mut capture = AudioCaptureLoop::new(Box::new(backend), sink.clone(), 64);
        let state = capture.subscribe_state();

        capture.start().unwrap();
        assert!(wait_for(|| *state.borrow() == CaptureState::Stopped));

        assert_eq!(sink.count(), 2);
        assert!(matches!(
            capture.last_error(),
            Some(PipelineError::StreamTerminated(_))
        ));
        assert!(matches!(
            *sink.terminated.lock().unwrap(),
            Some(PipelineError::StreamTerminated(_))
        ));
    }

    #[test]
    fn test_short_reads_are_padded() {
        let sink = RecordingSink::default();
        let mut backend = FakeBackend::new(Counters::default());
        backend.short_reads = true;
        let mut capture = AudioCaptureLoop::new(Box::new(backend), sink.clone(), 64);

        capture.start().unwrap();
        assert!(wait_for(|| sink.count() >= 1));
        capture.stop();

        let frames = sink.frames.lock().unwrap();
        let (_, len, last) = frames[0];
        assert_eq!(len, 64);
        assert_eq!(last, 0.0);
    }

    #[test]
    fn test_stop_abandons_stalled_device() {
        let counters = Counters::default();
        counters.hold.store(true, Ordering::SeqCst);
        let sink = RecordingSink::default();
        let mut backend = FakeBackend::new(counters.clone());
        backend.stall_after = Some(2);
        let mut capture = AudioCaptureLoop::new(Box::new(backend), sink.clone(), 64);

        capture.start().unwrap();
        assert!(wait_for(|| sink.count() >= 2));

        let (tx, rx) = mpsc::channel();
        let stopper = thread::spawn(move || {
            capture.stop();
            tx.send(()).unwrap();
            capture
        });
        rx.recv_timeout(Duration::from_secs(3))
            .expect("stop() blocked on a stalled read");
        let mut capture = stopper.join().unwrap();

        assert_eq!(capture.state(), CaptureState::Stopped);
        assert_eq!(sink.count(), 2);
        assert!(matches!(
            capture.last_error(),
            Some(PipelineError::StreamTerminated(msg)) if msg.contains("stalled")
        ));

        // The stuck read still owns the sink
        assert!(matches!(capture.start(), Err(PipelineError::Device(_))));
        assert_eq!(capture.state(), CaptureState::Stopped);

        counters.hold.store(false, Ordering::SeqCst);
        assert!(wait_for(|| capture.start().is_ok()));
        assert!(capture.is_running());
        capture.stop();
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }
}
