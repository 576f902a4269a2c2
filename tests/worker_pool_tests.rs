use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tailwind_jit::compiler::compile_batch;
use tailwind_jit::pool::PoolOptions;
use tailwind_jit::worker::{TaskExecutor, TaskJob, TaskKind, ThreadWorker};
use tailwind_jit::{starter_rules, CompilerContext, JitError, RegexCache, RuleTable, WorkerPool};

fn classes(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| match i % 5 {
            0 => format!("p-{}", i),
            1 => format!("m-{}", i),
            2 => format!("hover:bg-red-{}", 100 + i % 900),
            3 => format!("md:gap-{}", i),
            _ => format!("z-{}", i),
        })
        .collect()
}

fn pool(concurrency: usize) -> WorkerPool {
    WorkerPool::new(PoolOptions {
        concurrency,
        ..PoolOptions::default()
    })
}

#[tokio::test]
async fn test_large_batch_is_split_across_workers() {
    let pool = pool(3);
    assert!(pool.is_parallel());
    assert_eq!(pool.worker_count(), 3);

    let batch = classes(150);
    let chunks = pool.plan(batch.len());
    assert_eq!(chunks, vec![0..50, 50..100, 100..150]);

    let rules = starter_rules();
    let parallel = pool.compile_classes(&batch, &rules).await.unwrap();

    let table = RuleTable::from_specs(&rules, &RegexCache::default()).unwrap();
    let single = compile_batch(&batch, table.rules());

    let parallel_set: HashSet<_> = parallel.into_iter().map(|c| (c.class, c.css)).collect();
    let single_set: HashSet<_> = single.into_iter().map(|c| (c.class, c.css)).collect();
    assert_eq!(parallel_set, single_set);

    let stats = pool.stats();
    assert_eq!(stats.workers.len(), 3);
    assert!(stats.workers.iter().all(|w| w.completed == 1));
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_parallel_and_inline_output_match() {
    let rules = starter_rules();
    let batch = classes(240);

    let parallel = pool(4).generate_css(&batch, &rules).await.unwrap();
    let inline = WorkerPool::inline().generate_css(&batch, &rules).await.unwrap();

    let blocks = |css: &str| -> HashSet<String> { css.split("\n\n").map(str::to_string).collect() };
    assert_eq!(blocks(&parallel), blocks(&inline));
}

#[tokio::test]
async fn test_small_batch_goes_to_one_worker() {
    let pool = pool(3);
    pool.compile_classes(&classes(10), &starter_rules()).await.unwrap();

    let completed: Vec<u64> = pool.stats().workers.iter().map(|w| w.completed).collect();
    assert_eq!(completed.iter().sum::<u64>(), 1);
}

#[tokio::test]
async fn test_empty_batch_yields_empty_css() {
    let pool = pool(2);
    assert_eq!(pool.generate_css(&[], &starter_rules()).await.unwrap(), "");
    assert!(pool.match_rules(&[], &starter_rules()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_classes_are_compiled_once() {
    let pool = pool(2);
    let batch = vec!["flex".to_string(), "p-4".to_string(), "flex".to_string()];
    let compiled = pool.compile_classes(&batch, &starter_rules()).await.unwrap();
    assert_eq!(compiled.len(), 2);
}

#[tokio::test]
async fn test_match_rules_reports_every_hit() {
    let pool = pool(2);
    let matches = pool
        .match_rules(&["bg-red-500".to_string(), "unknown-utility".to_string()], &starter_rules())
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].rule_id, "bg-color");
    assert_eq!(matches[0].captures, vec!["red".to_string(), "500".to_string()]);
}

#[tokio::test]
async fn test_timeout_does_not_leak_pending_slot() {
    let worker = ThreadWorker::spawn(0, Duration::from_millis(1), 1000).unwrap();
    let job = TaskJob {
        kind: TaskKind::GenerateCss,
        classes: classes(20_000),
        rules: Arc::new(starter_rules()),
    };

    let result = worker.submit(job).await;
    assert!(matches!(result, Err(JitError::Timeout { .. })));
    assert_eq!(worker.stats().pending, 0);
    worker.terminate();
}

#[tokio::test]
async fn test_terminated_pool_rejects_tasks() {
    let pool = pool(2);
    pool.terminate();
    let err = pool.generate_css(&classes(5), &starter_rules()).await.unwrap_err();
    assert!(matches!(err, JitError::Terminated));
}

#[tokio::test]
async fn test_context_uses_pool_and_cache() {
    let mut config = tailwind_jit::JitConfig::default();
    config.workers.concurrency = 2;
    let context = CompilerContext::from_config(&config).unwrap();
    let batch = classes(120);

    let first = context.compile(&batch).await.unwrap();
    let second = context.compile(&batch).await.unwrap();
    assert_eq!(first, second);

    let stats = context.cache().unwrap().stats();
    assert_eq!(stats.hits, 120);
    context.shutdown();
}

#[test]
fn test_every_worker_gets_a_chunk() {
    let pool = pool(32);
    let chunks = pool.plan(100);
    assert_eq!(chunks.len(), 32);
    assert_eq!(chunks.iter().map(|r| r.len()).sum::<usize>(), 100);
    assert_eq!(chunks[0], 0..4);
    assert_eq!(chunks[31], 97..100);
}

#[tokio::test]
async fn test_timed_out_chunk_is_rerun_in_process() {
    let pool = WorkerPool::new(PoolOptions {
        concurrency: 2,
        task_timeout: Duration::from_millis(1),
        ..PoolOptions::default()
    });
    let batch = classes(20_000);
    let rules = starter_rules();

    let compiled = pool.compile_classes(&batch, &rules).await.unwrap();

    let table = RuleTable::from_specs(&rules, &RegexCache::default()).unwrap();
    let expected: HashSet<_> = compile_batch(&batch, table.rules())
        .into_iter()
        .map(|c| (c.class, c.css))
        .collect();
    let actual: HashSet<_> = compiled.into_iter().map(|c| (c.class, c.css)).collect();
    assert_eq!(actual, expected);
    assert_eq!(pool.stats().pending, 0);
}
