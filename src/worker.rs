//! Task executors behind the worker pool.
//!
//! A [`ThreadWorker`] owns an OS thread fed through a channel; tasks run in
//! submission order and each submission carries its own timeout. The
//! [`InlineExecutor`] runs the same job synchronously in the caller and
//! is used when no threads are available.

use crate::compiler::{compile_batch_with, match_batch, ClassCss};
use crate::errors::{JitError, Result};
use crate::matcher::Match;
use crate::parser::ClassNameParser;
use crate::regex_cache::RegexCache;
use crate::rule::{Rule, RuleSpec};
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Default per-task timeout
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

/// Tasks a worker thread handles before it is replaced
pub const DEFAULT_RECYCLE_AFTER: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskKind {
    GenerateCss,
    MatchRules,
}

/// Unit of work sent to an executor. Rules travel in their plain-data form.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub kind: TaskKind,
    pub classes: Vec<String>,
    pub rules: Arc<Vec<RuleSpec>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Compiled(Vec<ClassCss>),
    Matches(Vec<Match>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Active,
    Recycled,
    Terminated,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub id: usize,
    pub state: WorkerState,
    /// Tasks currently executing
    pub active: usize,
    /// Tasks sent but not yet picked up
    pub queued: usize,
    /// Tasks whose caller is still waiting for a result
    pub pending: usize,
    pub completed: u64,
    pub recycled: u64,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn submit(&self, job: TaskJob) -> Result<TaskOutput>;

    /// Reject pending work and release resources. Idempotent.
    fn terminate(&self);

    fn stats(&self) -> WorkerStats;
}

/// Run a job against a freshly rebuilt rule table
pub fn run_job(job: &TaskJob, regex_cache: &Arc<RegexCache>) -> Result<TaskOutput> {
    let rules = job
        .rules
        .iter()
        .map(|spec| Rule::from_spec(spec, regex_cache))
        .collect::<Result<Vec<_>>>()?;
    let parser = ClassNameParser::new(Arc::clone(regex_cache));

    Ok(match job.kind {
        TaskKind::GenerateCss => {
            TaskOutput::Compiled(compile_batch_with(&job.classes, &rules, |c| parser.parse(c)))
        }
        TaskKind::MatchRules => TaskOutput::Matches(match_batch(&job.classes, &rules, |c| parser.parse(c))),
    })
}

/// Executes jobs immediately on the calling task
pub struct InlineExecutor {
    id: usize,
    regex_cache: Arc<RegexCache>,
    completed: AtomicU64,
    terminated: AtomicBool,
}

impl InlineExecutor {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            regex_cache: Arc::new(RegexCache::new()),
            completed: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl TaskExecutor for InlineExecutor {
    async fn submit(&self, job: TaskJob) -> Result<TaskOutput> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(JitError::Terminated);
        }
        let output = run_job(&job, &self.regex_cache)?;
        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            state: if self.terminated.load(Ordering::Acquire) {
                WorkerState::Terminated
            } else {
                WorkerState::Idle
            },
            active: 0,
            queued: 0,
            pending: 0,
            completed: self.completed.load(Ordering::Relaxed),
            recycled: 0,
        }
    }
}

struct Envelope {
    task_id: u64,
    job: TaskJob,
    cancelled: Arc<AtomicBool>,
}

type Reply = oneshot::Sender<Result<TaskOutput>>;

struct Shared {
    id: usize,
    receiver: Receiver<Envelope>,
    pending: Mutex<HashMap<u64, Reply>>,
    state: Mutex<WorkerState>,
    active: AtomicUsize,
    completed: AtomicU64,
    recycled: AtomicU64,
    recycle_after: u64,
    terminated: AtomicBool,
}

/// Worker backed by a dedicated OS thread
pub struct ThreadWorker {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Envelope>>>,
    next_task: AtomicU64,
    timeout: Duration,
}

impl ThreadWorker {
    pub fn spawn(id: usize, timeout: Duration, recycle_after: u64) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            id,
            receiver,
            pending: Mutex::new(HashMap::new()),
            state: Mutex::new(WorkerState::Idle),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            recycled: AtomicU64::new(0),
            recycle_after: recycle_after.max(1),
            terminated: AtomicBool::new(false),
        });
        spawn_thread(Arc::clone(&shared))?;

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            next_task: AtomicU64::new(1),
            timeout,
        })
    }
}

fn spawn_thread(shared: Arc<Shared>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("jit-worker-{}", shared.id))
        .spawn(move || run_loop(shared))
        .map(|_| ())
}

fn run_loop(shared: Arc<Shared>) {
    let regex_cache = Arc::new(RegexCache::new());
    let mut handled = 0u64;

    while let Ok(envelope) = shared.receiver.recv() {
        if shared.terminated.load(Ordering::Acquire) {
            break;
        }
        if envelope.cancelled.load(Ordering::Acquire) {
            continue;
        }

        shared.active.store(1, Ordering::Release);
        *shared.state.lock() = WorkerState::Active;

        let result = catch_unwind(AssertUnwindSafe(|| run_job(&envelope.job, &regex_cache)))
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!("worker {} panicked on task {}: {}", shared.id, envelope.task_id, message);
                Err(JitError::WorkerCrashed(message))
            });

        shared.active.store(0, Ordering::Release);
        *shared.state.lock() = WorkerState::Idle;
        shared.completed.fetch_add(1, Ordering::Relaxed);

        if let Some(reply) = shared.pending.lock().remove(&envelope.task_id) {
            let _ = reply.send(result);
        }

        handled += 1;
        if handled >= shared.recycle_after && !shared.terminated.load(Ordering::Acquire) {
            shared.recycled.fetch_add(1, Ordering::Relaxed);
            *shared.state.lock() = WorkerState::Recycled;
            match spawn_thread(Arc::clone(&shared)) {
                Ok(()) => {
                    tracing::debug!("worker {} recycled after {} tasks", shared.id, handled);
                    return;
                }
                Err(e) => {
                    tracing::warn!("worker {} could not be recycled: {}", shared.id, e);
                    *shared.state.lock() = WorkerState::Idle;
                    handled = 0;
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl TaskExecutor for ThreadWorker {
    async fn submit(&self, job: TaskJob) -> Result<TaskOutput> {
        if self.shared.terminated.load(Ordering::Acquire) {
            return Err(JitError::Terminated);
        }

        let task_id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (reply, result) = oneshot::channel();
        self.shared.pending.lock().insert(task_id, reply);

        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send(Envelope {
                    task_id,
                    job,
                    cancelled: Arc::clone(&cancelled),
                })
                .is_ok(),
            None => false,
        };
        if !sent {
            self.shared.pending.lock().remove(&task_id);
            return Err(JitError::Terminated);
        }

        match tokio::time::timeout(self.timeout, result).await {
            Ok(Ok(output)) => output,
            Ok(Err(_)) => Err(JitError::WorkerCrashed(format!(
                "worker {} dropped task {}",
                self.shared.id, task_id
            ))),
            Err(_) => {
                cancelled.store(true, Ordering::Release);
                self.shared.pending.lock().remove(&task_id);
                tracing::warn!("task {} on worker {} timed out", task_id, self.shared.id);
                Err(JitError::Timeout {
                    task_id,
                    timeout: self.timeout,
                })
            }
        }
    }

    fn terminate(&self) {
        if self.shared.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the sender ends the thread once it is idle.
        self.sender.lock().take();
        let pending: Vec<Reply> = self.shared.pending.lock().drain().map(|(_, reply)| reply).collect();
        for reply in pending {
            let _ = reply.send(Err(JitError::Terminated));
        }
        *self.shared.state.lock() = WorkerState::Terminated;
    }

    fn stats(&self) -> WorkerStats {
        let state = if self.shared.terminated.load(Ordering::Acquire) {
            WorkerState::Terminated
        } else {
            *self.shared.state.lock()
        };
        WorkerStats {
            id: self.shared.id,
            state,
            active: self.shared.active.load(Ordering::Acquire),
            queued: self.shared.receiver.len(),
            pending: self.shared.pending.lock().len(),
            completed: self.shared.completed.load(Ordering::Relaxed),
            recycled: self.shared.recycled.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
