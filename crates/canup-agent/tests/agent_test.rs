//! Agent loop tests with a scripted artifact source and the mock bus

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canup_agent::{Agent, ArtifactError, ArtifactSource};
use canup_core::channel::mock::MockBus;
use canup_core::{
    CycleOutcome, HandshakeSettings, InterfaceControl, InterfaceError, MockConfig, StagedArtifact,
    UpdateError, UpdateGate, Updater,
};
use parking_lot::Mutex;
use tokio::sync::watch;

// =============================================================================
// Stubs
// =============================================================================

/// Hands out queued results, then reports "up to date"
#[derive(Default)]
struct ScriptedSource {
    results: Mutex<Vec<Result<Option<StagedArtifact>, ArtifactError>>>,
    checks: AtomicUsize,
}

impl ScriptedSource {
    fn with(results: Vec<Result<Option<StagedArtifact>, ArtifactError>>) -> Self {
        let mut results = results;
        results.reverse();
        Self {
            results: Mutex::new(results),
            checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactSource for ScriptedSource {
    async fn check(&self) -> Result<Option<StagedArtifact>, ArtifactError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.results.lock().pop().unwrap_or(Ok(None))
    }
}

struct ReadyInterface;

#[async_trait]
impl InterfaceControl for ReadyInterface {
    async fn bring_up(&self) -> Result<(), InterfaceError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingUpdater {
    invocations: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Updater for RecordingUpdater {
    async fn invoke(&self, artifact: &StagedArtifact) -> Result<(), UpdateError> {
        self.invocations.lock().push(artifact.path.clone());
        Ok(())
    }
}

fn staged() -> StagedArtifact {
    StagedArtifact::new("/tmp/configurationFull.gciBin")
}

fn agent(
    source: Arc<ScriptedSource>,
    bus: &MockBus,
    updater: Arc<RecordingUpdater>,
    shutdown: watch::Receiver<bool>,
) -> Agent {
    let gate = UpdateGate::new(
        HandshakeSettings::default(),
        Arc::new(bus.clone()),
        Arc::new(ReadyInterface),
        updater,
    )
    .with_shutdown(shutdown.clone());
    Agent::new(source, gate, Duration::from_secs(60), shutdown)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_once_delivers_update() {
    let (_tx, rx) = watch::channel(false);
    let source = Arc::new(ScriptedSource::with(vec![Ok(Some(staged()))]));
    let bus = MockBus::new(&MockConfig::default());
    let updater = Arc::new(RecordingUpdater::default());
    let mut agent = agent(source.clone(), &bus, updater.clone(), rx);

    let outcome = agent.run_once().await;

    assert_eq!(outcome, CycleOutcome::Completed);
    assert_eq!(bus.sent_frames().len(), 1);
    assert_eq!(
        *updater.invocations.lock(),
        vec![PathBuf::from("/tmp/configurationFull.gciBin")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_once_without_new_artifact() {
    let (_tx, rx) = watch::channel(false);
    let source = Arc::new(ScriptedSource::default());
    let bus = MockBus::new(&MockConfig::default());
    let updater = Arc::new(RecordingUpdater::default());
    let mut agent = agent(source, &bus, updater.clone(), rx);

    assert_eq!(agent.run_once().await, CycleOutcome::NoActionNeeded);
    assert_eq!(bus.opened(), 0);
    assert!(updater.invocations.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_check_failure_skips_cycle() {
    let (_tx, rx) = watch::channel(false);
    let source = Arc::new(ScriptedSource::with(vec![Err(ArtifactError::io(
        "/tmp/configurationFull.gciBin",
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    ))]));
    let bus = MockBus::new(&MockConfig::default());
    let updater = Arc::new(RecordingUpdater::default());
    let mut agent = agent(source, &bus, updater.clone(), rx);

    assert_eq!(agent.run_once().await, CycleOutcome::NoActionNeeded);
    assert_eq!(bus.opened(), 0);
    assert!(updater.invocations.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_retried_on_next_tick() {
    let (_tx, rx) = watch::channel(false);
    // Fresh only once; later checks report the staged copy as current
    let source = Arc::new(ScriptedSource::with(vec![Ok(Some(staged()))]));
    let bus = MockBus::silent();
    let updater = Arc::new(RecordingUpdater::default());
    let mut agent = agent(source.clone(), &bus, updater.clone(), rx);

    let first = agent.run_once().await;
    assert!(matches!(first, CycleOutcome::HandshakeFailed(_)));
    assert_eq!(agent.pending(), Some(&staged()));

    // Controller comes back before the next tick
    bus.inject(canup_core::build_frame(0x18FF14FB, &[1]).unwrap());
    let second = agent.run_once().await;

    assert_eq!(second, CycleOutcome::Completed);
    assert_eq!(agent.pending(), None);
    assert_eq!(bus.sent_frames().len(), 2);
    assert_eq!(updater.invocations.lock().len(), 1);

    // Delivered; nothing left to do
    assert_eq!(agent.run_once().await, CycleOutcome::NoActionNeeded);
    assert_eq!(bus.opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_newer_artifact_replaces_pending() {
    let (_tx, rx) = watch::channel(false);
    let newer = StagedArtifact::new("/tmp/configurationFull.v2.gciBin");
    let source = Arc::new(ScriptedSource::with(vec![
        Ok(Some(staged())),
        Ok(Some(newer.clone())),
    ]));
    let bus = MockBus::silent();
    let updater = Arc::new(RecordingUpdater::default());
    let mut agent = agent(source, &bus, updater.clone(), rx);

    assert!(!agent.run_once().await.is_completed());
    bus.inject(canup_core::build_frame(0x18FF14FB, &[1]).unwrap());
    assert!(agent.run_once().await.is_completed());

    assert_eq!(*updater.invocations.lock(), vec![newer.path]);
}

#[tokio::test(start_paused = true)]
async fn test_run_ticks_until_shutdown() {
    let (tx, rx) = watch::channel(false);
    let source = Arc::new(ScriptedSource::default());
    let bus = MockBus::new(&MockConfig::default());
    let updater = Arc::new(RecordingUpdater::default());
    let agent = agent(source.clone(), &bus, updater, rx);

    let handle = tokio::spawn(agent.run());

    // Ticks at 0s, 60s and 120s
    tokio::time::sleep(Duration::from_secs(150)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(source.checks.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_when_sender_dropped() {
    let (tx, rx) = watch::channel(false);
    let source = Arc::new(ScriptedSource::default());
    let bus = MockBus::new(&MockConfig::default());
    let updater = Arc::new(RecordingUpdater::default());
    let agent = agent(source.clone(), &bus, updater, rx);

    let handle = tokio::spawn(agent.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(tx);
    handle.await.unwrap();

    assert_eq!(source.checks.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_handshake() {
    let (tx, rx) = watch::channel(false);
    let source = Arc::new(ScriptedSource::with(vec![Ok(Some(staged()))]));
    let bus = MockBus::silent();
    let updater = Arc::new(RecordingUpdater::default());
    let agent = agent(source, &bus, updater.clone(), rx);

    let handle = tokio::spawn(agent.run());
    tokio::time::sleep(Duration::from_millis(2500)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    // Cancelled on the next poll boundary, well before the 10s timeout
    assert_eq!(bus.receive_calls(), 3);
    assert!(updater.invocations.lock().is_empty());
}
