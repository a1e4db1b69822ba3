//! Parallel execution of one job over a list of segments.
//!
//! Segment 0 runs in this process on the caller's chain. Every other segment
//! gets its own worker process, spawned for this call only:
//!
//! ```text
//!  caller                                 worker k (k = 1..N-1)
//!  ──────                                 ─────────────────────
//!  spawn N-1 workers
//!  RunSegment{k, segment, descriptor, job} ─▶ open chain from descriptor
//!  Exit, close stdin                       ─▶ map segment, encode result
//!  map segment 0 (blocking pool)        ◀── Payload{length} + bytes | Error
//!  wait for every worker
//!  reap (or kill and reap) every worker
//!  decode payloads in segment order against the caller's chain
//! ```
//!
//! Results are collected by segment index, never by completion order, and
//! the error of the lowest failing segment wins.
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chainscan_config::CONFIG;
use chainscan_ledger::{Chain, LedgerDescriptor};
use futures::future::join_all;
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as ProcessCommand};

use crate::error::{EngineError, SerializationError, WorkerFailure};
use crate::job::RangeJob;
use crate::partition::Segment;
use crate::protocol::EntityCodec;
use crate::value::Value;
use crate::wire::{self, Command, FailureKind, Response, WireError};
use crate::worker::panic_message;

pub const WORKER_BINARY: &str = "chainscan-worker";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> u32 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    (id % (u32::MAX as u64)) as u32
}

/// Locates the worker executable: the explicit path, then `CHAINSCAN_WORKER`,
/// then `PATH`, then next to the current executable.
pub fn resolve_worker_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Some(path) = CONFIG.worker.clone() {
        tracing::debug!(path = ?path, "using worker from config");
        return path;
    }

    if let Ok(path) = which::which(WORKER_BINARY) {
        tracing::debug!(path = ?path, "using worker from PATH");
        return path;
    }

    if let Some(dir) = std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
    {
        let candidate = dir.join(WORKER_BINARY);
        if candidate.exists() {
            tracing::debug!(path = ?candidate, "using worker next to current executable");
            return candidate;
        }
    }

    tracing::debug!("using worker from default PATH resolution");
    PathBuf::from(WORKER_BINARY)
}

struct WorkerProc {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: BufReader<ChildStdout>,
}

/// Worker processes of one call. Dropping the pool kills every child.
struct WorkerPool {
    workers: Vec<WorkerProc>,
}

impl WorkerPool {
    fn spawn(worker_path: &Path, count: usize, forward_stderr: bool) -> Result<Self, WorkerFailure> {
        tracing::debug!(worker_path = ?worker_path, count, "spawning workers");
        let workers = (0..count)
            .map(|_| spawn_worker(worker_path, forward_stderr))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { workers })
    }

    /// Reaps every worker. Unless `graceful`, workers are killed first.
    async fn shutdown(self, graceful: bool) {
        let waits = self.workers.into_iter().enumerate().map(|(i, mut worker)| async move {
            drop(worker.stdin.take());
            if !graceful {
                if let Err(e) = worker.child.start_kill() {
                    tracing::warn!(segment = i + 1, error = %e, "failed to kill worker");
                }
            }
            match worker.child.wait().await {
                Ok(status) if graceful && !status.success() => {
                    tracing::warn!(segment = i + 1, %status, "worker exited abnormally");
                }
                Ok(status) => tracing::trace!(segment = i + 1, %status, "worker reaped"),
                Err(e) => tracing::warn!(segment = i + 1, error = %e, "failed to reap worker"),
            }
        });
        join_all(waits).await;
    }
}

fn spawn_worker(worker_path: &Path, forward_stderr: bool) -> Result<WorkerProc, WorkerFailure> {
    let spawn_failure = |source| WorkerFailure::Spawn {
        path: worker_path.to_path_buf(),
        source,
    };
    let stderr = if forward_stderr {
        Stdio::inherit()
    } else {
        Stdio::null()
    };
    let mut child = ProcessCommand::new(worker_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_failure)?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| spawn_failure(std::io::Error::other("no stdin")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| spawn_failure(std::io::Error::other("no stdout")))?;

    Ok(WorkerProc {
        child,
        stdin: Some(BufWriter::new(stdin)),
        stdout: BufReader::with_capacity(1024 * 1024, stdout),
    })
}

#[derive(Debug, Clone)]
pub struct Executor {
    codec: EntityCodec,
    worker_path: PathBuf,
    forward_worker_stderr: bool,
}

impl Executor {
    pub fn new(codec: EntityCodec, worker_path: PathBuf, forward_worker_stderr: bool) -> Self {
        Self {
            codec,
            worker_path,
            forward_worker_stderr,
        }
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }

    /// Runs `job` over every segment and returns the results in segment
    /// order. A single segment is computed locally without any worker or
    /// encoding.
    pub async fn execute(
        &self,
        chain: &Chain,
        segments: &[Segment],
        job: Arc<dyn RangeJob>,
    ) -> Result<Vec<Value>, EngineError> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Vec::new());
        };
        if rest.is_empty() {
            tracing::debug!(segment = %first, "single segment, computing locally");
            return Ok(vec![run_local(chain.clone(), *first, job).await?]);
        }

        let mut pool = WorkerPool::spawn(&self.worker_path, rest.len(), self.forward_worker_stderr)?;
        let descriptor = chain.descriptor();
        let remote = join_all(
            pool.workers
                .iter_mut()
                .zip(rest)
                .enumerate()
                .map(|(i, (worker, segment))| {
                    run_remote(worker, i + 1, *segment, descriptor, job.clone())
                }),
        );
        let local = run_local(chain.clone(), *first, job.clone());
        let (local, remote) = tokio::join!(local, remote);

        let succeeded = local.is_ok() && remote.iter().all(Result::is_ok);
        pool.shutdown(succeeded).await;

        let mut results = Vec::with_capacity(segments.len());
        results.push(local?);
        for (i, payload) in remote.into_iter().enumerate() {
            let segment = i + 1;
            let value = self
                .codec
                .decode(&payload?, chain)
                .map_err(|source| EngineError::Resolution { segment, source })?;
            results.push(value);
        }
        Ok(results)
    }
}

async fn run_local(
    chain: Chain,
    segment: Segment,
    job: Arc<dyn RangeJob>,
) -> Result<Value, EngineError> {
    let outcome = tokio::task::spawn_blocking(move || -> Result<Value, EngineError> {
        let blocks = chain.slice(segment.start, segment.end)?;
        job.map(&blocks).map_err(|e| {
            WorkerFailure::Job {
                segment: 0,
                message: format!("{e:#}"),
            }
            .into()
        })
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(e) => {
            let message = if e.is_panic() {
                panic_message(e.into_panic().as_ref())
            } else {
                e.to_string()
            };
            Err(WorkerFailure::Job { segment: 0, message }.into())
        }
    }
}

fn wire_failure(segment: usize) -> impl Fn(WireError) -> EngineError {
    move |e| {
        let failure = match e {
            WireError::Io(source) => WorkerFailure::Io { segment, source },
            WireError::Serde(e) => WorkerFailure::Protocol {
                segment,
                message: e.to_string(),
            },
            WireError::Protocol(message) => WorkerFailure::Protocol { segment, message },
        };
        failure.into()
    }
}

async fn run_remote(
    worker: &mut WorkerProc,
    segment_index: usize,
    segment: Segment,
    descriptor: &LedgerDescriptor,
    job: Arc<dyn RangeJob>,
) -> Result<Vec<u8>, EngineError> {
    let request_id = next_request_id();
    let failure = wire_failure(segment_index);

    let Some(mut stdin) = worker.stdin.take() else {
        return Err(failure(WireError::Protocol("worker input already closed".to_string())));
    };
    let command = Command::RunSegment {
        request_id,
        segment_index,
        segment,
        descriptor: descriptor.clone(),
        job,
    };
    tracing::debug!(request_id, segment_index, %segment, "dispatching segment");
    wire::write_frame(&mut stdin, &command).await.map_err(&failure)?;
    wire::write_frame(&mut stdin, &Command::Exit).await.map_err(&failure)?;
    drop(stdin);

    let response: Response = wire::read_frame(&mut worker.stdout).await.map_err(&failure)?;
    match response {
        Response::Payload {
            request_id: answered,
            segment_index: index,
            length,
        } => {
            if answered != request_id || index != segment_index {
                return Err(failure(WireError::Protocol(format!(
                    "expected an answer to request {request_id} for segment {segment_index}, \
                     got request {answered} for segment {index}"
                ))));
            }
            let payload = wire::read_payload(&mut worker.stdout, length)
                .await
                .map_err(&failure)?;
            tracing::debug!(request_id, segment_index, bytes = length, "segment result received");
            Ok(payload)
        }
        Response::Error { kind, message, .. } => {
            tracing::debug!(request_id, segment_index, ?kind, "segment failed in worker");
            Err(remote_failure(segment_index, kind, message))
        }
    }
}

/// Caller-side error for a failure a worker reported on `segment`.
fn remote_failure(segment: usize, kind: FailureKind, message: String) -> EngineError {
    match kind {
        FailureKind::Job => WorkerFailure::Job { segment, message }.into(),
        FailureKind::Ledger => WorkerFailure::Ledger { segment, message }.into(),
        FailureKind::Protocol => WorkerFailure::Protocol { segment, message }.into(),
        FailureKind::Serialization => EngineError::Serialization {
            segment,
            source: SerializationError::Remote(message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::CollectHeights;
    use crate::test_support::sample_chain;

    #[tokio::test]
    async fn single_segment_needs_no_worker() {
        let (_dir, chain) = sample_chain(30);
        let codec = EntityCodec::new();
        let executor = Executor::new(codec.clone(), PathBuf::from("/nonexistent/worker"), false);

        let results = executor
            .execute(&chain, &[Segment::new(10, 20)], Arc::new(CollectHeights))
            .await
            .unwrap();
        assert_eq!(results, vec![Value::from((10u64..20).collect::<Vec<_>>())]);
        assert_eq!(codec.stats().snapshot().invocations(), 0);
    }

    #[tokio::test]
    async fn missing_worker_binary_is_a_spawn_failure() {
        let (_dir, chain) = sample_chain(30);
        let executor = Executor::new(EntityCodec::new(), PathBuf::from("/nonexistent/worker"), false);

        let err = executor
            .execute(
                &chain,
                &[Segment::new(0, 10), Segment::new(10, 20)],
                Arc::new(CollectHeights),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Worker(WorkerFailure::Spawn { .. })
        ));
    }

    #[test]
    fn worker_failures_keep_their_kind_and_segment() {
        let err = remote_failure(
            3,
            FailureKind::Serialization,
            "Unsupported value: non-finite float NaN".to_string(),
        );
        assert_eq!(err.segment(), Some(3));
        match err {
            EngineError::Serialization {
                segment,
                source: SerializationError::Remote(message),
            } => {
                assert_eq!(segment, 3);
                assert!(message.contains("non-finite"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            remote_failure(2, FailureKind::Job, "boom".to_string()),
            EngineError::Worker(WorkerFailure::Job { segment: 2, .. })
        ));
        assert!(matches!(
            remote_failure(1, FailureKind::Ledger, "truncated".to_string()),
            EngineError::Worker(WorkerFailure::Ledger { segment: 1, .. })
        ));
        assert!(matches!(
            remote_failure(4, FailureKind::Protocol, "bad frame".to_string()),
            EngineError::Worker(WorkerFailure::Protocol { segment: 4, .. })
        ));
    }

    #[test]
    fn explicit_worker_path_wins() {
        let path = Path::new("/opt/bin/custom-worker");
        assert_eq!(resolve_worker_path(Some(path)), path);
    }
}
