#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crawldesk_core::config::{EngineConfig, PacingConfig};
use crawldesk_core::models::{
    CoreError, CoreErrorKind, ItemOutcome, NewTask, TaskItem, TaskSnapshot,
};
use crawldesk_core::orchestration::{OrchestrationResult, TaskEngine, TaskObserver};
use crawldesk_core::output::OutputRevealer;
use crawldesk_core::session::{SessionContext, SessionFuture, WorkerSession, WorkerSessionFactory};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const OUTPUT_NAME: &str = "probe_query.xlsx";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Step {
    Ok,
    Recoverable,
    Fatal,
    Sleep(u64),
    Hang,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub step: Step,
}

impl TaskItem for Probe {
    type Record = Vec<String>;

    fn sheet_header() -> &'static [&'static str] {
        &["name", "detail"]
    }

    fn label(&self) -> String {
        self.name.clone()
    }

    fn error_row(&self, reason: &str) -> Vec<String> {
        vec![self.name.clone(), reason.to_string()]
    }
}

pub fn probe(name: &str, step: Step) -> Probe {
    Probe {
        name: name.to_string(),
        step,
    }
}

/// Ordered `start:<task>:<item>` / `end:<task>:<item>` events across sessions.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn for_task(&self, task: &str) -> Vec<String> {
        let marker = format!(":{task}:");
        self.events()
            .into_iter()
            .filter(|event| event.contains(&marker))
            .collect()
    }
}

pub struct ScriptedSession {
    pub task_id: String,
    log: Arc<EventLog>,
    closed: AtomicBool,
    close_signal: Notify,
    pub close_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

impl ScriptedSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn wait_closed(&self) {
        let notified = self.close_signal.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    async fn run(&self, item: &Probe) -> ItemOutcome<Vec<String>> {
        if self.is_closed() {
            return ItemOutcome::Fatal("session closed".to_string());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.log.push(format!("start:{}:{}", self.task_id, item.name));

        let outcome = match &item.step {
            Step::Ok => ItemOutcome::Success(vec![item.name.clone(), "ok".to_string()]),
            Step::Recoverable => ItemOutcome::Recoverable(format!("no match for {}", item.name)),
            Step::Fatal => ItemOutcome::Fatal(format!("browser crashed on {}", item.name)),
            Step::Sleep(millis) => {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(*millis)) => {
                        ItemOutcome::Success(vec![item.name.clone(), "slept".to_string()])
                    }
                    () = self.wait_closed() => ItemOutcome::Fatal("session closed".to_string()),
                }
            }
            Step::Hang => {
                self.wait_closed().await;
                ItemOutcome::Fatal("session closed".to_string())
            }
        };

        self.log.push(format!("end:{}:{}", self.task_id, item.name));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

impl WorkerSession<Probe> for ScriptedSession {
    fn process<'a>(&'a self, item: &'a Probe) -> SessionFuture<'a, ItemOutcome<Vec<String>>> {
        Box::pin(self.run(item))
    }

    fn close(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            self.close_signal.notify_waiters();
        })
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    pub log: Arc<EventLog>,
    pub fail_open: AtomicBool,
    /// Simulated browser launch time, in milliseconds.
    pub open_delay_ms: AtomicU64,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
    contexts: Mutex<Vec<SessionContext>>,
}

impl ScriptedFactory {
    pub fn failing() -> Self {
        let factory = Self::default();
        factory.fail_open.store(true, Ordering::SeqCst);
        factory
    }

    pub fn slow(open_delay: Duration) -> Self {
        let factory = Self::default();
        factory
            .open_delay_ms
            .store(open_delay.as_millis() as u64, Ordering::SeqCst);
        factory
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, task_id: &str) -> Option<Arc<ScriptedSession>> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|session| session.task_id == task_id)
            .cloned()
    }

    pub fn contexts(&self) -> Vec<SessionContext> {
        self.contexts.lock().unwrap().clone()
    }
}

impl WorkerSessionFactory<Probe> for ScriptedFactory {
    fn open(
        &self,
        context: SessionContext,
    ) -> SessionFuture<'_, OrchestrationResult<Arc<dyn WorkerSession<Probe>>>> {
        Box::pin(async move {
            let delay = self.open_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(CoreError::for_task(
                    &context.task_id,
                    CoreErrorKind::SessionFailure,
                    "browser failed to launch",
                ));
            }

            let session = Arc::new(ScriptedSession {
                task_id: context.task_id.to_string(),
                log: self.log.clone(),
                closed: AtomicBool::new(false),
                close_signal: Notify::new(),
                close_calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            });
            self.sessions.lock().unwrap().push(session.clone());
            self.contexts.lock().unwrap().push(context);
            Ok(session as Arc<dyn WorkerSession<Probe>>)
        })
    }
}

#[derive(Default)]
pub struct RecordingRevealer {
    revealed: Mutex<Vec<PathBuf>>,
}

impl RecordingRevealer {
    pub fn revealed(&self) -> Vec<PathBuf> {
        self.revealed.lock().unwrap().clone()
    }
}

impl OutputRevealer for RecordingRevealer {
    fn reveal(&self, folder: &std::path::Path) {
        self.revealed.lock().unwrap().push(folder.to_path_buf());
    }
}

pub struct RecordingObserver {
    batches: Mutex<Vec<Vec<TaskSnapshot<Probe>>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Vec<TaskSnapshot<Probe>>> {
        self.batches.lock().unwrap().last().cloned()
    }

    pub fn batches(&self) -> Vec<Vec<TaskSnapshot<Probe>>> {
        self.batches.lock().unwrap().clone()
    }
}

impl TaskObserver<Probe> for RecordingObserver {
    fn on_tasks_changed(&self, tasks: &[TaskSnapshot<Probe>]) {
        self.batches.lock().unwrap().push(tasks.to_vec());
    }
}

pub fn quiet_config() -> EngineConfig {
    EngineConfig {
        pacing: PacingConfig::immediate(),
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub engine: TaskEngine<Probe>,
    pub factory: Arc<ScriptedFactory>,
    pub revealer: Arc<RecordingRevealer>,
    pub observer: Arc<RecordingObserver>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ScriptedFactory::default(), quiet_config())
    }

    pub fn build(factory: ScriptedFactory, config: EngineConfig) -> Self {
        let factory = Arc::new(factory);
        let revealer = Arc::new(RecordingRevealer::default());
        let observer = Arc::new(RecordingObserver::new());
        let engine = TaskEngine::<Probe>::builder(factory.clone())
            .observer(observer.clone())
            .revealer(revealer.clone())
            .config(config)
            .build();

        Self {
            engine,
            factory,
            revealer,
            observer,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// A runnable task writing under the harness directory.
    pub fn task(&self, id: &str, items: Vec<Probe>) -> NewTask<Probe> {
        NewTask::new(id)
            .items(items)
            .output(self.dir.path(), OUTPUT_NAME)
    }

    pub fn output_folder(&self) -> PathBuf {
        self.dir.path().join("excel_database").join("probe_")
    }

    pub fn sheet_path(&self) -> PathBuf {
        self.output_folder().join("probe_.csv")
    }
}
