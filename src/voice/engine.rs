//! Recognition engine
//!
//! [`VoicePipeline`] turns one chunk of microphone audio into session
//! transitions: preprocess, front end, stage bookkeeping, dynamic gain,
//! phrase matching, and finally dispatch through the voice bridge.
//! [`RecognitionEngine`] runs a pipeline on a dedicated worker thread while
//! holding the recognition session on the microphone.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::grammar::Grammar;
use super::recognizer::{DetectState, Recognizer};
use super::session::{RecognitionSession, SessionEvent, VoiceState};
use super::status::{SharedTelemetry, Telemetry};
use crate::audio::{
    AudioFrame, CHUNK_SAMPLES, DynamicGain, PreprocessingState, SessionGuard, SessionKind,
    SharedSnip, SnipReason, SourceArbiter,
};
use crate::config::{SharedTuning, Tuning};
use crate::events::{EventBus, VoiceEvent};
use crate::security::VoiceAuthBridge;
use crate::{Error, Result};

/// Grammar shared between the engine, the pipeline and the command surface
pub type SharedGrammar = Arc<RwLock<Grammar>>;

/// Wait for the microphone per chunk
const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait for samples per chunk
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait for the worker to acknowledge a stop or control request
const WORKER_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed hardware read
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Requests delivered to a running pipeline
enum Control {
    LoadWakeModel {
        path: PathBuf,
        reply: mpsc::Sender<Result<()>>,
    },
    GrammarChanged,
    ResetStats {
        reply: mpsc::Sender<Result<()>>,
    },
}

/// Per-chunk recognition processing
pub struct VoicePipeline {
    recognizer: Box<dyn Recognizer>,
    session: RecognitionSession,
    grammar: SharedGrammar,
    preprocess: PreprocessingState,
    dyn_gain: DynamicGain,
    tuning: SharedTuning,
    telemetry: SharedTelemetry,
    bridge: Arc<VoiceAuthBridge>,
    arbiter: Arc<SourceArbiter>,
    snip: SharedSnip,
    events: EventBus,
    detect_calls: u64,
    detections: u64,
}

impl VoicePipeline {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        grammar: SharedGrammar,
        tuning: SharedTuning,
        telemetry: SharedTelemetry,
        bridge: Arc<VoiceAuthBridge>,
        arbiter: Arc<SourceArbiter>,
        snip: SharedSnip,
        events: EventBus,
    ) -> Self {
        let gain_percent = tuning.read().mic_gain_percent;
        Self {
            recognizer,
            session: RecognitionSession::new(),
            grammar,
            preprocess: PreprocessingState::new(gain_percent),
            dyn_gain: DynamicGain::new(),
            tuning,
            telemetry,
            bridge,
            arbiter,
            snip,
            events,
            detect_calls: 0,
            detections: 0,
        }
    }

    #[must_use]
    pub const fn session(&self) -> &RecognitionSession {
        &self.session
    }

    /// Reset per-session state and load the idle phrase set
    pub fn prepare(&mut self) {
        self.preprocess.reset();
        self.preprocess
            .set_gain_percent(self.tuning.read().mic_gain_percent);
        self.dyn_gain.reset();
        self.session.reset();
        self.snip.lock().reset();
        self.recognizer.clean();
        self.push_phrases();
        self.sync_telemetry();
    }

    /// Zero the detection, rejection and dynamic gain counters
    pub fn reset_stats(&mut self) {
        self.session.reset_counters();
        self.dyn_gain.reset();
        self.detect_calls = 0;
        self.detections = 0;
        self.sync_telemetry();
        tracing::info!("recognition counters reset");
    }

    /// Process one chunk of raw microphone audio
    pub fn process_chunk(&mut self, mut frame: AudioFrame, now: Instant) {
        if frame.is_empty() {
            return;
        }
        let tuning = self.tuning.read().clone();
        self.feed_snip(frame.samples());

        self.preprocess.set_gain_percent(tuning.mic_gain_percent);
        self.preprocess
            .process(frame.samples_mut(), tuning.software_gain(), tuning.filters);
        self.arbiter.note_level(frame.level_percent());

        let front = self.recognizer.feed(frame.samples());
        self.telemetry.write().volume_db = front.volume_db;

        if front.wake {
            let event = self.session.wake(now, tuning.command_timeout);
            if event == SessionEvent::Woke {
                self.recognizer.clean();
            }
            self.handle(event);
        }
        if front.speech {
            self.session.speech(now, tuning.command_timeout);
        }
        let expired = self.session.tick(now);
        self.handle(expired);

        if self.session.state().is_listening() {
            self.detect(frame, front.speech, &tuning, now);
        }
        self.sync_telemetry();
    }

    fn detect(&mut self, frame: AudioFrame, speech: bool, tuning: &Tuning, now: Instant) {
        let mut samples = frame.into_inner();
        let speech = speech || self.session.speech_started();
        if tuning.gap_accept.require_speech
            && self.session.state() == VoiceState::AwaitingTarget
            && !speech
        {
            return;
        }
        self.dyn_gain
            .process(&tuning.dynamic_gain, &mut samples, speech);

        self.detect_calls += 1;
        let event = match self.recognizer.detect(&samples) {
            DetectState::Detecting => return,
            DetectState::Timeout => self.session.recognizer_timeout(),
            DetectState::Detected(hypotheses) => {
                self.detections += 1;
                tracing::debug!(
                    candidates = hypotheses.len(),
                    top = hypotheses.first().map(|h| h.phrase.as_str()),
                    confidence = hypotheses.first().map(|h| h.confidence),
                    state = %self.session.state(),
                    "phrase detected"
                );
                let grammar = self.grammar.read().clone();
                let event = self.session.hypotheses(&grammar, &hypotheses, tuning, now);
                self.recognizer.clean();
                event
            }
        };
        self.handle(event);
    }

    fn handle(&mut self, event: SessionEvent) {
        let changes_stage = event.changes_stage();
        match &event {
            SessionEvent::Woke => self.begin_snip(),
            SessionEvent::Dispatch { command, .. } => self.finish_snip(command),
            SessionEvent::Cancelled => self.finish_snip("cancelled"),
            SessionEvent::TimedOut => self.finish_snip("timeout"),
            SessionEvent::Unknown { .. } => self.finish_snip("unknown"),
            SessionEvent::Ignored
            | SessionEvent::Stage(_)
            | SessionEvent::Rejected { .. }
            | SessionEvent::Help { .. } => {}
        }
        match event {
            SessionEvent::Ignored => return,
            SessionEvent::Woke => {
                self.telemetry.write().last_wake_at = Some(Utc::now());
                self.events.publish(VoiceEvent::Wake {
                    wake_count: self.session.wake_count(),
                });
            }
            SessionEvent::Stage(state) => {
                let options = self.session.options(&self.grammar.read());
                tracing::info!(state = %state, options = ?options, "voice stage");
                self.events.publish(VoiceEvent::Stage { state, options });
            }
            SessionEvent::Dispatch {
                command,
                phrase,
                confidence,
            } => self.dispatch(command, phrase, confidence),
            SessionEvent::Rejected {
                phrase, confidence, ..
            } => {
                self.events
                    .publish(VoiceEvent::Rejected { phrase, confidence });
            }
            SessionEvent::Help { options } => {
                tracing::info!(state = %self.session.state(), options = ?options, "voice help");
                self.events.publish(VoiceEvent::Help { options });
            }
            SessionEvent::Cancelled => self.events.publish(VoiceEvent::Cancelled),
            SessionEvent::TimedOut => self.events.publish(VoiceEvent::TimedOut),
            SessionEvent::Unknown { phrase } => {
                tracing::warn!(phrase = %phrase, "phrase not understood");
                self.events.publish(VoiceEvent::Unknown { phrase });
            }
        }
        if changes_stage {
            self.push_phrases();
        }
    }

    fn dispatch(&self, command: String, phrase: String, confidence: f32) {
        let user = self.bridge.armed().map(|t| t.user);
        let result = self.bridge.execute_as_armed_user(&command);

        let ok = result.is_ok();
        let response = match result {
            Ok(response) => {
                tracing::info!(command = %command, user = ?user, "voice command executed");
                response
            }
            Err(e) => {
                tracing::warn!(command = %command, user = ?user, error = %e, "voice command rejected");
                e.to_string()
            }
        };

        self.events.publish(VoiceEvent::Command {
            command,
            phrase: phrase.clone(),
            confidence,
            user,
            ok,
            response,
        });

        let mut telemetry = self.telemetry.write();
        telemetry.last_command = Some(phrase);
        if ok {
            telemetry.command_count += 1;
            telemetry.last_command_at = Some(Utc::now());
        }
    }

    fn feed_snip(&self, samples: &[i16]) {
        match self.snip.lock().feed(samples) {
            Ok(Some(path)) => self.events.publish(VoiceEvent::SnippetSaved {
                path: path.display().to_string(),
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "snippet write failed"),
        }
    }

    fn begin_snip(&self) {
        let mut snip = self.snip.lock();
        if snip.is_enabled() && !snip.is_active() {
            if let Err(e) = snip.begin(SnipReason::Wake) {
                tracing::warn!(error = %e, "snippet not started");
            }
        }
    }

    fn finish_snip(&self, label: &str) {
        match self.snip.lock().finish(label) {
            Ok(Some(path)) => self.events.publish(VoiceEvent::SnippetSaved {
                path: path.display().to_string(),
            }),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "snippet write failed"),
        }
    }

    fn control(&mut self, message: Control) {
        match message {
            Control::LoadWakeModel { path, reply } => {
                let result = self.recognizer.load_wake_model(&path);
                // The requester may have given up waiting
                let _ = reply.send(result);
            }
            Control::GrammarChanged => {
                self.session.reset();
                self.recognizer.clean();
                self.push_phrases();
                self.sync_telemetry();
            }
            Control::ResetStats { reply } => {
                self.reset_stats();
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn push_phrases(&mut self) {
        let phrases = self.session.stage_phrases(&self.grammar.read());
        if let Err(e) = self.recognizer.set_phrases(&phrases) {
            tracing::warn!(error = %e, phrases = phrases.len(), "recognizer rejected phrase set");
        }
    }

    fn sync_telemetry(&self) {
        let mut t = self.telemetry.write();
        t.state = self.session.state();
        t.category = self.session.category().map(str::to_string);
        t.subcategory = self.session.subcategory().map(str::to_string);
        t.wake_count = self.session.wake_count();
        t.low_confidence_rejects = self.session.low_confidence_rejects();
        t.gap_accepts = self.session.gap_accepts();
        t.last_confidence = self.session.last_confidence();
        t.dyn_gain_current = self.dyn_gain.current();
        t.dyn_gain_applied = self.dyn_gain.applied();
        t.dyn_gain_bypassed = self.dyn_gain.bypassed();
        t.detect_calls = self.detect_calls;
        t.detections = self.detections;
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    control: mpsc::Sender<Control>,
    done: mpsc::Receiver<VoicePipeline>,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

/// Owns the recognition pipeline and its worker thread
pub struct RecognitionEngine {
    arbiter: Arc<SourceArbiter>,
    grammar: SharedGrammar,
    snip: SharedSnip,
    telemetry: SharedTelemetry,
    events: EventBus,
    parked: Mutex<Option<VoicePipeline>>,
    worker: Mutex<Option<Worker>>,
    enabled: AtomicBool,
    recognizer_name: String,
}

impl RecognitionEngine {
    #[must_use]
    pub fn new(
        recognizer: Box<dyn Recognizer>,
        grammar: Grammar,
        tuning: SharedTuning,
        bridge: Arc<VoiceAuthBridge>,
        arbiter: Arc<SourceArbiter>,
        snip: SharedSnip,
        events: EventBus,
    ) -> Self {
        let recognizer_name = recognizer.name().to_string();
        let grammar = Arc::new(RwLock::new(grammar));
        let telemetry = SharedTelemetry::default();
        let pipeline = VoicePipeline::new(
            recognizer,
            Arc::clone(&grammar),
            tuning,
            Arc::clone(&telemetry),
            bridge,
            Arc::clone(&arbiter),
            Arc::clone(&snip),
            events.clone(),
        );
        Self {
            arbiter,
            grammar,
            snip,
            telemetry,
            events,
            parked: Mutex::new(Some(pipeline)),
            worker: Mutex::new(None),
            enabled: AtomicBool::new(true),
            recognizer_name,
        }
    }

    #[must_use]
    pub fn recognizer_name(&self) -> &str {
        &self.recognizer_name
    }

    #[must_use]
    pub fn snip(&self) -> &SharedSnip {
        &self.snip
    }

    /// Start the worker thread
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if disabled or already running, or
    /// `Error::Busy` if a recording holds the microphone
    pub fn start(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::InvalidState("speech recognition is disabled".to_string()));
        }

        let mut worker = self.worker.lock();
        self.reap(&mut worker);
        if worker.is_some() {
            return Err(Error::InvalidState("speech recognition already running".to_string()));
        }

        let session = self.arbiter.begin_session(SessionKind::Recognition)?;
        let mut pipeline = self
            .parked
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("recognizer unavailable".to_string()))?;
        pipeline.prepare();

        let stop = Arc::new(AtomicBool::new(false));
        let (control_tx, control_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let telemetry = Arc::clone(&self.telemetry);
        let events = self.events.clone();
        let worker_stop = Arc::clone(&stop);

        telemetry.write().running = true;
        let spawned = std::thread::Builder::new()
            .name("sr-worker".to_string())
            .spawn(move || {
                run_worker(&mut pipeline, &session, &worker_stop, &control_rx);
                pipeline.session.reset();
                pipeline.snip.lock().reset();
                pipeline.sync_telemetry();
                drop(session);
                telemetry.write().running = false;
                events.publish(VoiceEvent::Stopped);
                tracing::info!("speech recognition stopped");
                let _ = done_tx.send(pipeline);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.telemetry.write().running = false;
                return Err(Error::Io(e));
            }
        };

        *worker = Some(Worker {
            stop,
            control: control_tx,
            done: done_rx,
            thread: handle.thread().id(),
            handle,
        });
        drop(worker);

        tracing::info!(recognizer = %self.recognizer_name, "speech recognition started");
        self.events.publish(VoiceEvent::Started);
        Ok(())
    }

    /// Signal the worker and wait for it to finish
    ///
    /// Called from the worker itself (a voice command stopping recognition)
    /// this only signals.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if not running, or `Error::StopTimeout`
    /// if the worker does not acknowledge within one second
    pub fn stop(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        self.reap(&mut slot);
        let Some(worker) = slot.take() else {
            return Err(Error::InvalidState("speech recognition not running".to_string()));
        };

        worker.stop.store(true, Ordering::SeqCst);
        if std::thread::current().id() == worker.thread {
            tracing::debug!("stop requested from recognition worker");
            *slot = Some(worker);
            return Ok(());
        }
        drop(slot);

        match worker.done.recv_timeout(WORKER_REPLY_TIMEOUT) {
            Ok(pipeline) => {
                if worker.handle.join().is_err() {
                    tracing::error!("recognition worker panicked");
                }
                *self.parked.lock() = Some(pipeline);
                Ok(())
            }
            Err(_) => {
                tracing::warn!("recognition worker did not stop in time");
                *self.worker.lock() = Some(worker);
                Err(Error::StopTimeout("recognition"))
            }
        }
    }

    /// Whether the worker is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        let mut worker = self.worker.lock();
        self.reap(&mut worker);
        worker.as_ref().is_some_and(|w| !w.stop.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable recognition; disabling stops a running worker
    ///
    /// # Errors
    ///
    /// Returns error if the running worker cannot be stopped
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled && self.is_running() {
            self.stop()?;
        }
        Ok(())
    }

    /// Load a wake-word model; on failure the previous model stays active
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the recognizer rejects the model, or
    /// `Error::Busy` if the running worker does not respond
    pub fn load_wake_model(&self, path: &Path) -> Result<()> {
        let owned = path.to_path_buf();
        let result = self.on_pipeline(
            |reply| Control::LoadWakeModel { path: owned, reply },
            |pipeline| pipeline.recognizer.load_wake_model(path),
        );
        match &result {
            Ok(()) => tracing::info!(path = %path.display(), "wake model loaded"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "wake model load failed"),
        }
        result
    }

    /// Zero the recognition counters on the running or parked pipeline
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` if the running worker does not respond
    pub fn reset_stats(&self) -> Result<()> {
        self.on_pipeline(
            |reply| Control::ResetStats { reply },
            |pipeline| {
                pipeline.reset_stats();
                Ok(())
            },
        )
    }

    /// Run a request on the worker if one is running, else on the parked
    /// pipeline
    fn on_pipeline(
        &self,
        request: impl FnOnce(mpsc::Sender<Result<()>>) -> Control,
        parked: impl FnOnce(&mut VoicePipeline) -> Result<()>,
    ) -> Result<()> {
        let mut worker = self.worker.lock();
        self.reap(&mut worker);

        if let Some(w) = worker.as_ref() {
            if std::thread::current().id() == w.thread {
                return Err(Error::InvalidState(
                    "cannot reconfigure from the recognition worker".to_string(),
                ));
            }
            let (reply_tx, reply_rx) = mpsc::channel();
            w.control
                .send(request(reply_tx))
                .map_err(|_| Error::InvalidState("recognition worker exited".to_string()))?;
            drop(worker);
            reply_rx
                .recv_timeout(WORKER_REPLY_TIMEOUT)
                .map_err(|_| Error::Busy("recognition worker did not respond".to_string()))?
        } else {
            drop(worker);
            let mut slot = self.parked.lock();
            let pipeline = slot
                .as_mut()
                .ok_or_else(|| Error::InvalidState("recognizer unavailable".to_string()))?;
            parked(pipeline)
        }
    }

    /// Replace the grammar
    pub fn set_grammar(&self, grammar: Grammar) {
        tracing::info!(entries = grammar.len(), "grammar replaced");
        *self.grammar.write() = grammar;
        if let Some(w) = self.worker.lock().as_ref() {
            // A worker that already exited will load phrases on next start
            let _ = w.control.send(Control::GrammarChanged);
        }
    }

    /// Load a grammar file; on failure the previous grammar stays active
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelLoad` if the file cannot be read or parsed
    pub fn load_grammar(&self, path: &Path) -> Result<usize> {
        let grammar = Grammar::from_file(path).inspect_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "grammar load failed");
        })?;
        let entries = grammar.len();
        self.set_grammar(grammar);
        Ok(entries)
    }

    /// Edit the active grammar in place; on error nothing changes
    ///
    /// # Errors
    ///
    /// Returns whatever `edit` returns
    pub fn edit_grammar<T>(&self, edit: impl FnOnce(&mut Grammar) -> Result<T>) -> Result<T> {
        let mut grammar = self.grammar.write();
        let mut draft = grammar.clone();
        let out = edit(&mut draft)?;
        *grammar = draft;
        let entries = grammar.len();
        drop(grammar);
        tracing::info!(entries, "grammar edited");
        if let Some(w) = self.worker.lock().as_ref() {
            let _ = w.control.send(Control::GrammarChanged);
        }
        Ok(out)
    }

    /// Copy of the active grammar
    #[must_use]
    pub fn grammar(&self) -> Grammar {
        self.grammar.read().clone()
    }

    /// Copy of the current telemetry
    #[must_use]
    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.read().clone()
    }

    /// Collect a worker that exited on its own
    fn reap(&self, worker: &mut Option<Worker>) {
        if !worker.as_ref().is_some_and(|w| w.handle.is_finished()) {
            return;
        }
        let Some(w) = worker.take() else {
            return;
        };
        match w.done.try_recv() {
            Ok(pipeline) => *self.parked.lock() = Some(pipeline),
            Err(_) => tracing::error!("recognition worker exited without returning its pipeline"),
        }
        if w.handle.join().is_err() {
            tracing::error!("recognition worker panicked");
        }
    }
}

impl Drop for RecognitionEngine {
    fn drop(&mut self) {
        if let Some(w) = self.worker.get_mut().take() {
            w.stop.store(true, Ordering::SeqCst);
            if std::thread::current().id() != w.thread {
                let _ = w.done.recv_timeout(WORKER_REPLY_TIMEOUT);
            }
        }
    }
}

fn run_worker(
    pipeline: &mut VoicePipeline,
    session: &SessionGuard,
    stop: &AtomicBool,
    control: &mpsc::Receiver<Control>,
) {
    session.warm_up(stop);
    let mut buf = vec![0i16; CHUNK_SAMPLES];

    while !stop.load(Ordering::SeqCst) {
        while let Ok(message) = control.try_recv() {
            pipeline.control(message);
        }

        let read = match session.arbiter().acquire("recognition", ACQUIRE_TIMEOUT) {
            Ok(mut lease) => lease.read(&mut buf, READ_TIMEOUT),
            Err(_) => continue,
        };

        match read {
            Ok(0) => {}
            Ok(n) => pipeline.process_chunk(AudioFrame::new(buf[..n].to_vec()), Instant::now()),
            Err(e) => {
                tracing::debug!(error = %e, "recognition read failed");
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }
}
