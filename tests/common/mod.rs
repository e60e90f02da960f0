#![allow(dead_code)]

use async_trait::async_trait;
use media_squeeze::config::ConfigBuilder;
use media_squeeze::engine::{Engine, EngineEvent, EngineHandle};
use media_squeeze::error::{EngineError, ProbeError};
use media_squeeze::job::ProbeState;
use media_squeeze::media::{MediaKind, SourceContent, SourceFile};
use media_squeeze::metadata::Resolution;
use media_squeeze::orchestrator::{Orchestrator, QueueSettings};
use media_squeeze::probe::{ProbeReport, Prober};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

/// In-memory engine that records every call
pub struct FakeEngine {
    pub calls: Mutex<Vec<String>>,
    pub execs: Mutex<Vec<Vec<String>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_on: Mutex<HashSet<String>>,
    panic_on: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
    load_error: Option<String>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    events: broadcast::Sender<EngineEvent>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            calls: Mutex::new(Vec::new()),
            execs: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            fail_on: Mutex::new(HashSet::new()),
            panic_on: Mutex::new(HashSet::new()),
            gate: None,
            load_error: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            events,
        }
    }

    /// Every exec waits for one permit on the returned semaphore
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let engine = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (engine, gate)
    }

    pub fn failing_load(reason: &str) -> Self {
        Self {
            load_error: Some(reason.to_string()),
            ..Self::new()
        }
    }

    pub fn fail_on(&self, name: &str) {
        self.fail_on.lock().unwrap().insert(name.to_string());
    }

    pub fn succeed_on(&self, name: &str) {
        self.fail_on.lock().unwrap().remove(name);
    }

    pub fn panic_on(&self, name: &str) {
        self.panic_on.lock().unwrap().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn exec_count(&self) -> usize {
        self.execs.lock().unwrap().len()
    }

    /// Input file names in the order they were executed
    pub fn executed_inputs(&self) -> Vec<String> {
        self.execs
            .lock()
            .unwrap()
            .iter()
            .map(|argv| input_name(argv))
            .collect()
    }

    pub fn stored_files(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn input_name(argv: &[String]) -> String {
    argv.iter()
        .position(|a| a == "-i")
        .and_then(|i| argv.get(i + 1))
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Engine for FakeEngine {
    async fn load(&self, _module_urls: &[String]) -> Result<(), EngineError> {
        self.record("load".to_string());
        match &self.load_error {
            Some(reason) => Err(EngineError::Load(reason.clone())),
            None => Ok(()),
        }
    }

    async fn mount(&self, dir: &str, files: &[SourceFile]) -> Result<(), EngineError> {
        self.record(format!("mount:{}", dir));
        let mut stored = self.files.lock().unwrap();
        for file in files {
            if let SourceContent::Memory(bytes) = file.content() {
                stored.insert(format!("{}/{}", dir, file.name()), bytes.to_vec());
            }
        }
        Ok(())
    }

    async fn unmount(&self, dir: &str) -> Result<(), EngineError> {
        self.record(format!("unmount:{}", dir));
        let prefix = format!("{}/", dir);
        self.files.lock().unwrap().retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    async fn exec(&self, argv: Vec<String>) -> Result<(), EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.record("exec".to_string());
        self.execs.lock().unwrap().push(argv.clone());
        let name = input_name(&argv);

        let _ = self.events.send(EngineEvent::Log(format!("encoding {}", name)));
        let _ = self.events.send(EngineEvent::Progress(0.5));

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if self.panic_on.lock().unwrap().contains(&name) {
            panic!("encoder crashed on {}", name);
        }
        if self.fail_on.lock().unwrap().contains(&name) {
            return Err(EngineError::Exec(format!("corrupt input {}", name)));
        }

        let output = argv.last().cloned().unwrap_or_default();
        self.files
            .lock()
            .unwrap()
            .insert(output, format!("compressed:{}", name).into_bytes());
        let _ = self.events.send(EngineEvent::Progress(1.0));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        self.record(format!("read:{}", path));
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| EngineError::Missing(path.to_string()))
    }

    async fn delete_file(&self, path: &str) -> Result<(), EngineError> {
        self.record(format!("delete:{}", path));
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| EngineError::Missing(path.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

/// Prober answering from canned values
pub struct FakeProber {
    failing: HashSet<String>,
    failing_once: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    slow: HashMap<String, Duration>,
    frame_rate: Option<u32>,
    pub probes: AtomicUsize,
}

impl FakeProber {
    pub fn new() -> Self {
        Self {
            failing: HashSet::new(),
            failing_once: Mutex::new(HashSet::new()),
            delay: None,
            slow: HashMap::new(),
            frame_rate: None,
            probes: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Only the first probe of `name` fails
    pub fn failing_once_for(self, name: &str) -> Self {
        self.failing_once.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn slow_for(mut self, name: &str, delay: Duration) -> Self {
        self.slow.insert(name.to_string(), delay);
        self
    }

    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = Some(fps);
        self
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, file: &SourceFile, kind: MediaKind) -> Result<ProbeReport, ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.slow.get(file.name()).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(file.name()) || self.failing_once.lock().unwrap().remove(file.name()) {
            return Err(ProbeError::Tool(format!("cannot decode {}", file.name())));
        }

        Ok(match kind {
            MediaKind::Video => ProbeReport {
                duration_seconds: Some(60.0),
                resolution: Some(Resolution::new(1920, 1080)),
            },
            MediaKind::Audio => ProbeReport {
                duration_seconds: Some(180.0),
                resolution: None,
            },
            MediaKind::Image => ProbeReport {
                duration_seconds: None,
                resolution: Some(Resolution::new(8000, 6000)),
            },
        })
    }

    async fn sniff_frame_rate(&self, _file: &SourceFile) -> Option<u32> {
        self.frame_rate
    }
}

/// A 60 MB video as far as the queue is concerned
pub fn video(name: &str) -> SourceFile {
    SourceFile::from_bytes(name, Some("video/mp4".to_string()), b"fake video".to_vec())
        .with_declared_size(60 * 1024 * 1024)
}

pub fn audio(name: &str) -> SourceFile {
    SourceFile::from_bytes(name, None, b"fake audio".to_vec()).with_declared_size(8 * 1024 * 1024)
}

pub fn image(name: &str) -> SourceFile {
    SourceFile::from_bytes(name, None, b"fake image".to_vec())
}

pub fn settings() -> QueueSettings {
    let config = ConfigBuilder::new()
        .with_threads(1)
        .with_probe_wait_seconds(5)
        .with_max_file_size(1024 * 1024 * 1024)
        .build();
    QueueSettings::from(&config)
}

/// Orchestrator over a bootstrapped engine
pub async fn orchestrator(engine: Arc<FakeEngine>, prober: FakeProber) -> Orchestrator {
    let handle = EngineHandle::new(engine);
    handle.bootstrap(&[]).await.unwrap();
    Orchestrator::with_settings(handle, Arc::new(prober), settings())
}

/// Poll until no job is still probing
pub async fn wait_for_probes(orchestrator: &Orchestrator) {
    for _ in 0..500 {
        let snapshot = orchestrator.snapshot().await;
        if snapshot.iter().all(|job| job.probe_state != ProbeState::Probing) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("probes did not settle");
}

/// Poll a synchronous condition for up to a few seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
