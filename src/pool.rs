//! Fan-out of class batches across workers.
//!
//! Batches at or above the parallel threshold are split into one chunk per
//! worker and dealt round-robin; smaller batches go to a single worker.
//! A chunk whose worker crashes or times out is rerun in process, so one
//! slow chunk never discards the output of its siblings.

use crate::compiler::{join_css, ClassCss};
use crate::errors::{JitError, Result};
use crate::matcher::Match;
use crate::rule::RuleSpec;
use crate::worker::{
    InlineExecutor, TaskExecutor, TaskJob, TaskKind, TaskOutput, ThreadWorker, WorkerStats, DEFAULT_RECYCLE_AFTER,
    DEFAULT_TASK_TIMEOUT,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Minimum batch size split across workers
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 100;

#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Worker threads; 0 runs everything inline
    pub concurrency: usize,
    pub task_timeout: Duration,
    pub recycle_after: u64,
    pub parallel_threshold: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            recycle_after: DEFAULT_RECYCLE_AFTER,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub parallel: bool,
    pub workers: Vec<WorkerStats>,
    pub active: usize,
    pub queued: usize,
    pub pending: usize,
}

pub struct WorkerPool {
    workers: Vec<Arc<dyn TaskExecutor>>,
    fallback: InlineExecutor,
    next: AtomicUsize,
    parallel_threshold: usize,
    terminated: AtomicBool,
}

impl WorkerPool {
    /// Spawn `options.concurrency` worker threads. If none can be started the
    /// pool runs inline.
    pub fn new(options: PoolOptions) -> Self {
        let mut workers: Vec<Arc<dyn TaskExecutor>> = Vec::with_capacity(options.concurrency);
        for id in 0..options.concurrency {
            match ThreadWorker::spawn(id, options.task_timeout, options.recycle_after) {
                Ok(worker) => workers.push(Arc::new(worker)),
                Err(e) => {
                    tracing::warn!("could not start worker {}: {}", id, e);
                    break;
                }
            }
        }
        if workers.is_empty() {
            tracing::info!("worker pool running inline");
        } else {
            tracing::debug!("worker pool started with {} workers", workers.len());
        }

        Self {
            workers,
            fallback: InlineExecutor::new(usize::MAX),
            next: AtomicUsize::new(0),
            parallel_threshold: options.parallel_threshold.max(1),
            terminated: AtomicBool::new(false),
        }
    }

    /// Pool with no threads; every task runs in the caller
    pub fn inline() -> Self {
        Self::new(PoolOptions {
            concurrency: 0,
            ..PoolOptions::default()
        })
    }

    pub fn is_parallel(&self) -> bool {
        !self.workers.is_empty()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Chunk ranges a batch of `len` distinct classes is split into
    pub fn plan(&self, len: usize) -> Vec<Range<usize>> {
        if self.workers.len() > 1 && len >= self.parallel_threshold {
            plan_chunks(len, self.workers.len())
        } else if len == 0 {
            Vec::new()
        } else {
            vec![0..len]
        }
    }

    /// Compile classes to per-class CSS records, in first-seen order
    pub async fn compile_classes(&self, classes: &[String], rules: &[RuleSpec]) -> Result<Vec<ClassCss>> {
        let mut compiled = Vec::new();
        for output in self.run(TaskKind::GenerateCss, classes, rules).await? {
            if let TaskOutput::Compiled(chunk) = output {
                compiled.extend(chunk);
            }
        }
        Ok(compiled)
    }

    /// Compile classes into one stylesheet fragment; empty input yields ""
    pub async fn generate_css(&self, classes: &[String], rules: &[RuleSpec]) -> Result<String> {
        Ok(join_css(&self.compile_classes(classes, rules).await?))
    }

    pub async fn match_rules(&self, classes: &[String], rules: &[RuleSpec]) -> Result<Vec<Match>> {
        let mut matches = Vec::new();
        for output in self.run(TaskKind::MatchRules, classes, rules).await? {
            if let TaskOutput::Matches(chunk) = output {
                matches.extend(chunk);
            }
        }
        Ok(matches)
    }

    async fn run(&self, kind: TaskKind, classes: &[String], rules: &[RuleSpec]) -> Result<Vec<TaskOutput>> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(JitError::Terminated);
        }

        let mut seen = HashSet::new();
        let unique: Vec<String> = classes
            .iter()
            .filter(|class| seen.insert(class.as_str()))
            .cloned()
            .collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let rules = Arc::new(rules.to_vec());
        let chunks = self.plan(unique.len());
        let submissions = chunks.into_iter().map(|range| {
            let job = TaskJob {
                kind,
                classes: unique[range].to_vec(),
                rules: Arc::clone(&rules),
            };
            self.submit_with_fallback(self.next_worker(), job)
        });

        join_all(submissions).await.into_iter().collect()
    }

    fn next_worker(&self) -> Option<&Arc<dyn TaskExecutor>> {
        if self.workers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers.get(index)
    }

    async fn submit_with_fallback(&self, worker: Option<&Arc<dyn TaskExecutor>>, job: TaskJob) -> Result<TaskOutput> {
        let Some(worker) = worker else {
            return self.fallback.submit(job).await;
        };
        match worker.submit(job.clone()).await {
            Err(e) if is_recoverable(&e) && !self.terminated.load(Ordering::Acquire) => {
                tracing::warn!("{}; running chunk of {} classes inline", e, job.classes.len());
                self.fallback.submit(job).await
            }
            other => other,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let workers: Vec<WorkerStats> = if self.workers.is_empty() {
            vec![self.fallback.stats()]
        } else {
            self.workers.iter().map(|w| w.stats()).collect()
        };
        PoolStats {
            parallel: self.is_parallel(),
            active: workers.iter().map(|w| w.active).sum(),
            queued: workers.iter().map(|w| w.queued).sum(),
            pending: workers.iter().map(|w| w.pending).sum(),
            workers,
        }
    }

    /// Reject pending tasks and stop every worker
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            worker.terminate();
        }
        self.fallback.terminate();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn is_recoverable(error: &JitError) -> bool {
    error.is_resource_failure() || matches!(error, JitError::Timeout { .. })
}

/// Split `len` items into `min(len, parts)` contiguous ranges whose sizes
/// differ by at most one; the first `len % parts` ranges take the extra item
pub fn plan_chunks(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.min(len);
    if parts == 0 {
        return Vec::new();
    }
    let base = len / parts;
    let extra = len % parts;

    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}
