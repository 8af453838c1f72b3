//! Session controller
//!
//! Owns the live voice session lifecycle: connect, tool-call handling with
//! audio pause/resume, reconnect with exponential backoff, and a circuit
//! breaker over repeated connection-establishment failures.
//!
//! Clock and transport are trait seams so tests drive the state machine
//! with a fake clock and a scripted transport instead of real timers.

use crate::dispatcher::FunctionDispatcher;
use crate::error::SupportError;
use crate::models::{ConnectionState, SessionState, ToolCall, ToolResponse};
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll interval while waiting for the dispatcher's retrieval index.
const READY_POLL: Duration = Duration::from_millis(100);

//
// ================= Trait Seams =================
//

/// Time source. Production uses tokio timers; tests inject a fake that
/// records sleeps and advances manually.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The live audio/tool-call transport, consumed rather than implemented
/// here. `is_connected` reflects the link as the transport last saw it.
#[async_trait::async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn close(&self);
    fn is_connected(&self) -> bool;
}

/// Audio output gate. Tool execution must never overlap TTS playback, so
/// the controller pauses output for the duration of a batch.
pub trait AudioOutput: Send + Sync {
    fn pause(&self);
    fn resume(&self);
}

/// Transport that always connects. Keeps the demo binary functional
/// without a live voice backend.
pub struct LoopbackTransport {
    connected: std::sync::atomic::AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            connected: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LiveTransport for LoopbackTransport {
    async fn connect(&self) -> Result<()> {
        self.connected
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected
            .store(false, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// No-op audio sink for headless runs.
pub struct NullAudio;

impl AudioOutput for NullAudio {
    fn pause(&self) {}
    fn resume(&self) {}
}

//
// ================= Policies =================
//

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    pub max_consecutive_failures: u32,
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

//
// ================= Controller =================
//

/// Lifecycle state machine for one live session instance.
///
/// All mutation happens through `&mut self` event handlers; the connection
/// bookkeeping has no other writers.
pub struct SessionController {
    dispatcher: Arc<FunctionDispatcher>,
    transport: Arc<dyn LiveTransport>,
    audio: Arc<dyn AudioOutput>,
    clock: Arc<dyn Clock>,
    reconnect_policy: ReconnectPolicy,
    breaker_policy: BreakerPolicy,
    state: SessionState,
    connection: ConnectionState,
    user_disconnected: bool,
}

impl SessionController {
    pub fn new(
        dispatcher: Arc<FunctionDispatcher>,
        transport: Arc<dyn LiveTransport>,
        audio: Arc<dyn AudioOutput>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_policies(
            dispatcher,
            transport,
            audio,
            clock,
            ReconnectPolicy::default(),
            BreakerPolicy::default(),
        )
    }

    pub fn with_policies(
        dispatcher: Arc<FunctionDispatcher>,
        transport: Arc<dyn LiveTransport>,
        audio: Arc<dyn AudioOutput>,
        clock: Arc<dyn Clock>,
        reconnect_policy: ReconnectPolicy,
        breaker_policy: BreakerPolicy,
    ) -> Self {
        Self {
            dispatcher,
            transport,
            audio,
            clock,
            reconnect_policy,
            breaker_policy,
            state: SessionState::Disconnected,
            connection: ConnectionState::new(),
            user_disconnected: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    /// Explicit connect request. Refused while the circuit breaker cooldown
    /// is running; waits for dispatcher readiness before dialing.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == SessionState::Connected {
            return Ok(());
        }

        self.check_breaker()?;

        while !self.dispatcher.is_initialized() {
            debug!("Waiting for dispatcher initialization");
            self.clock.sleep(READY_POLL).await;
        }

        self.state = SessionState::Connecting;
        self.try_establish().await
    }

    /// Tool-call batch from the live session. Audio output is paused for
    /// the whole batch and resumed whether or not individual calls failed.
    /// A link drop during execution is honored only after the batch
    /// finishes, so no response is orphaned.
    pub async fn handle_tool_call(&mut self, calls: Vec<ToolCall>) -> Result<Vec<ToolResponse>> {
        if self.state != SessionState::Connected {
            return Err(SupportError::ConnectionFailure(format!(
                "tool call received in state '{}'",
                self.state
            )));
        }

        self.state = SessionState::ToolExecuting;
        self.audio.pause();
        debug!(batch_size = calls.len(), "Audio paused for tool execution");

        let responses = self.dispatcher.dispatch(calls).await;

        self.audio.resume();
        self.state = SessionState::Connected;
        debug!(response_count = responses.len(), "Audio resumed");

        if !self.transport.is_connected() {
            warn!("Link dropped during tool execution");
            self.on_session_closed().await;
        }

        Ok(responses)
    }

    /// Transport closed without a user request. Kicks off reconnection with
    /// exponential backoff unless the user already hung up.
    pub async fn on_session_closed(&mut self) {
        if self.user_disconnected {
            debug!("Session closed after user disconnect; not reconnecting");
            return;
        }

        self.connection.connected = false;
        self.auto_reconnect().await;
    }

    /// User-initiated disconnect. Idempotent; permanently disables
    /// auto-reconnect for this instance and resets connection bookkeeping.
    pub async fn disconnect(&mut self) {
        if self.user_disconnected {
            return;
        }

        self.user_disconnected = true;
        self.transport.close().await;
        self.state = SessionState::Disconnected;

        self.connection = ConnectionState::new();
        self.connection.reconnect_attempts = self.reconnect_policy.max_attempts;

        info!("Session disconnected by user");
    }

    fn check_breaker(&mut self) -> Result<()> {
        if let Some(until) = self.connection.circuit_open_until {
            let now = self.clock.now();
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(SupportError::CircuitOpen(format!(
                    "too many failed connection attempts; retry allowed in {}s",
                    remaining.as_secs()
                )));
            }

            // Cooldown elapsed: reset the counter and resume attempts
            self.connection.circuit_open_until = None;
            self.connection.consecutive_failures = 0;
            info!("Circuit breaker cooldown elapsed; attempts resume");
        }

        Ok(())
    }

    /// One dial attempt. Tracks consecutive establishment failures for the
    /// breaker; mid-session drops do not pass through here.
    async fn try_establish(&mut self) -> Result<()> {
        match self.transport.connect().await {
            Ok(()) => {
                self.state = SessionState::Connected;
                self.connection.connected = true;
                self.connection.consecutive_failures = 0;
                self.connection.reconnect_attempts = 0;
                info!("Session connected");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                self.connection.connected = false;
                self.connection.consecutive_failures += 1;

                if self.connection.consecutive_failures
                    >= self.breaker_policy.max_consecutive_failures
                {
                    let until = self.clock.now() + self.breaker_policy.cooldown;
                    self.connection.circuit_open_until = Some(until);
                    warn!(
                        failures = self.connection.consecutive_failures,
                        cooldown_secs = self.breaker_policy.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                }

                Err(SupportError::ConnectionFailure(e.to_string()))
            }
        }
    }

    /// Exponential backoff: base, 2x, 4x, ... capped at max_delay, up to
    /// max_attempts. Exhaustion parks the session in terminal Disconnected.
    async fn auto_reconnect(&mut self) {
        self.state = SessionState::Reconnecting;
        let mut delay = self.reconnect_policy.base_delay;

        for attempt in 1..=self.reconnect_policy.max_attempts {
            self.connection.reconnect_attempts = attempt;
            info!(
                attempt,
                max_attempts = self.reconnect_policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            self.clock.sleep(delay).await;

            if self.check_breaker().is_err() {
                warn!("Circuit breaker opened during reconnect; giving up");
                break;
            }

            match self.try_establish().await {
                Ok(()) => {
                    info!(attempt, "Reconnected");
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                }
            }

            delay = (delay * 2).min(self.reconnect_policy.max_delay);
            // try_establish flips state on failure; stay in Reconnecting
            // until the loop decides otherwise
            self.state = SessionState::Reconnecting;
        }

        self.state = SessionState::Disconnected;
        warn!("Reconnect attempts exhausted; manual reconnect required");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeStore;
    use crate::retrieval::{EmbeddingBackend, RetrievalService};
    use crate::support::SupportService;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    //
    // ===== Test doubles =====
    //

    struct FakeClock {
        start: Instant,
        offset: Mutex<Duration>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self {
                start: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
                sleeps: Mutex::new(Vec::new()),
            }
        }

        fn advance(&self, duration: Duration) {
            *self.offset.lock().unwrap() += duration;
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.start + *self.offset.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            self.advance(duration);
        }
    }

    /// Transport with a scripted sequence of connect outcomes. An empty
    /// script means every further dial fails.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<bool>>,
        attempts: AtomicUsize,
        connected: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(outcomes: &[bool]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                attempts: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
            }
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn drop_link(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl LiveTransport for ScriptedTransport {
        async fn connect(&self) -> crate::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let ok = self.outcomes.lock().unwrap().pop_front().unwrap_or(false);
            if ok {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(SupportError::ConnectionFailure("dial failed".to_string()))
            }
        }

        async fn close(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    struct SpyAudio {
        events: Mutex<Vec<&'static str>>,
    }

    impl SpyAudio {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    impl AudioOutput for SpyAudio {
        fn pause(&self) {
            self.events.lock().unwrap().push("pause");
        }

        fn resume(&self) {
            self.events.lock().unwrap().push("resume");
        }
    }

    struct FlatEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingBackend for FlatEmbedder {
        async fn embed(&self, _text: &str) -> crate::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    async fn ready_dispatcher() -> Arc<FunctionDispatcher> {
        let store = Arc::new(KnowledgeStore::from_json("[]").unwrap());
        let retrieval = Arc::new(RetrievalService::new(store, Arc::new(FlatEmbedder)));
        let dispatcher = FunctionDispatcher::new(Arc::new(SupportService::new(retrieval)));
        dispatcher.initialize().await.unwrap();
        Arc::new(dispatcher)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    async fn controller(
        transport: Arc<ScriptedTransport>,
        clock: Arc<FakeClock>,
        audio: Arc<SpyAudio>,
        reconnect: ReconnectPolicy,
        breaker: BreakerPolicy,
    ) -> SessionController {
        SessionController::with_policies(
            ready_dispatcher().await,
            transport,
            audio,
            clock,
            reconnect,
            breaker,
        )
    }

    fn lenient_breaker() -> BreakerPolicy {
        BreakerPolicy {
            max_consecutive_failures: 100,
            cooldown: secs(60),
        }
    }

    //
    // ===== Reconnect backoff =====
    //

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let transport = Arc::new(ScriptedTransport::new(&[true])); // connect ok, then all fail
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());
        let reconnect = ReconnectPolicy {
            base_delay: secs(1),
            max_delay: secs(4),
            max_attempts: 5,
        };

        let mut session = controller(
            transport.clone(),
            clock.clone(),
            audio,
            reconnect,
            lenient_breaker(),
        )
        .await;

        session.connect().await.unwrap();
        transport.drop_link();
        session.on_session_closed().await;

        assert_eq!(
            clock.sleeps(),
            vec![secs(1), secs(2), secs(4), secs(4), secs(4)]
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.connection().reconnect_attempts, 5);
        // 1 initial dial + 5 reconnect dials
        assert_eq!(transport.attempts(), 6);
    }

    #[tokio::test]
    async fn test_reconnect_success_restores_connected() {
        let transport = Arc::new(ScriptedTransport::new(&[true, false, true]));
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());
        let reconnect = ReconnectPolicy {
            base_delay: secs(1),
            max_delay: secs(30),
            max_attempts: 5,
        };

        let mut session = controller(
            transport.clone(),
            clock.clone(),
            audio,
            reconnect,
            lenient_breaker(),
        )
        .await;

        session.connect().await.unwrap();
        transport.drop_link();
        session.on_session_closed().await;

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.connection().reconnect_attempts, 0);
        assert_eq!(clock.sleeps(), vec![secs(1), secs(2)]);
    }

    //
    // ===== Circuit breaker =====
    //

    #[tokio::test]
    async fn test_breaker_opens_and_refuses_without_dialing() {
        let transport = Arc::new(ScriptedTransport::new(&[])); // every dial fails
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());
        let breaker = BreakerPolicy {
            max_consecutive_failures: 3,
            cooldown: secs(60),
        };

        let mut session = controller(
            transport.clone(),
            clock.clone(),
            audio,
            ReconnectPolicy::default(),
            breaker,
        )
        .await;

        for _ in 0..3 {
            let err = session.connect().await.unwrap_err();
            assert!(matches!(err, SupportError::ConnectionFailure(_)));
        }
        assert_eq!(transport.attempts(), 3);

        // Breaker is open: refused immediately, no network I/O
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SupportError::CircuitOpen(_)));
        assert_eq!(transport.attempts(), 3);

        // After the cooldown the counter resets and dialing resumes
        clock.advance(secs(61));
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SupportError::ConnectionFailure(_)));
        assert_eq!(transport.attempts(), 4);
        assert_eq!(session.connection().consecutive_failures, 1);
    }

    //
    // ===== Tool execution =====
    //

    #[tokio::test]
    async fn test_audio_paused_around_tool_batch() {
        let transport = Arc::new(ScriptedTransport::new(&[true]));
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());

        let mut session = controller(
            transport,
            clock,
            audio.clone(),
            ReconnectPolicy::default(),
            lenient_breaker(),
        )
        .await;

        session.connect().await.unwrap();

        let calls = vec![ToolCall {
            id: "c1".to_string(),
            name: "calculate_emi".to_string(),
            args: json!({"loan_amount": 100000, "annual_rate_percent": 12, "tenure_months": 12}),
        }];
        let responses = session.handle_tool_call(calls).await.unwrap();

        assert_eq!(responses.len(), 1);
        assert_eq!(audio.events(), vec!["pause", "resume"]);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_tool_call_rejected_when_not_connected() {
        let transport = Arc::new(ScriptedTransport::new(&[]));
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());

        let mut session = controller(
            transport,
            clock,
            audio,
            ReconnectPolicy::default(),
            lenient_breaker(),
        )
        .await;

        let err = session.handle_tool_call(vec![]).await.unwrap_err();
        assert!(matches!(err, SupportError::ConnectionFailure(_)));
    }

    #[tokio::test]
    async fn test_drop_during_execution_finishes_batch_then_reconnects() {
        // Initial connect, then one successful reconnect dial
        let transport = Arc::new(ScriptedTransport::new(&[true, true]));
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());
        let reconnect = ReconnectPolicy {
            base_delay: secs(1),
            max_delay: secs(30),
            max_attempts: 3,
        };

        let mut session = controller(
            transport.clone(),
            clock.clone(),
            audio.clone(),
            reconnect,
            lenient_breaker(),
        )
        .await;

        session.connect().await.unwrap();
        // Link drops while the batch is in flight
        transport.drop_link();

        let calls = vec![ToolCall {
            id: "c1".to_string(),
            name: "get_exchange_rates".to_string(),
            args: json!({}),
        }];
        let responses = session.handle_tool_call(calls).await.unwrap();

        // Batch completed and was answered before the drop was honored
        assert_eq!(responses.len(), 1);
        assert_eq!(audio.events(), vec!["pause", "resume"]);

        // Then the controller reconnected
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(transport.attempts(), 2);
    }

    //
    // ===== User disconnect =====
    //

    #[tokio::test]
    async fn test_user_disconnect_is_idempotent_and_disables_auto_reconnect() {
        let transport = Arc::new(ScriptedTransport::new(&[true]));
        let clock = Arc::new(FakeClock::new());
        let audio = Arc::new(SpyAudio::new());
        let reconnect = ReconnectPolicy {
            base_delay: secs(1),
            max_delay: secs(30),
            max_attempts: 5,
        };

        let mut session = controller(
            transport.clone(),
            clock.clone(),
            audio,
            reconnect.clone(),
            lenient_breaker(),
        )
        .await;

        session.connect().await.unwrap();
        session.disconnect().await;
        session.disconnect().await; // idempotent

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            session.connection().reconnect_attempts,
            reconnect.max_attempts
        );

        // A close event after a user disconnect must not dial
        session.on_session_closed().await;
        assert_eq!(transport.attempts(), 1);
        assert!(clock.sleeps().is_empty());
    }
}
