//! Worker side of the process pool.
//!
//! A worker reads [`Command`] frames from its input, opens (and caches) its
//! own read-only chain for each descriptor it is given, runs the job over the
//! requested segment and writes the encoded result back. It never sees the
//! caller's chain, only the descriptor.
//!
//! Custom job types become available to the engine by linking them into a
//! binary whose `main` calls [`serve_stdio`] and pointing `CHAINSCAN_WORKER`
//! at it.
use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};

use chainscan_ledger::{Chain, LedgerDescriptor};
use serde::Deserialize;

use crate::job::RangeJob;
use crate::partition::Segment;
use crate::protocol::EntityCodec;
use crate::wire::{self, Command, FailureKind, Response, WireError};

struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The addressing part of a command, readable even when the job is not.
#[derive(Deserialize)]
struct CommandHeader {
    request_id: u32,
    segment_index: usize,
}

/// Serves commands until `Exit` or end of input.
pub fn serve<R: Read, W: Write>(input: R, output: W) -> Result<(), WireError> {
    let mut input = BufReader::new(input);
    let mut output = BufWriter::with_capacity(1024 * 1024, output);
    let codec = EntityCodec::new();
    let mut chains: HashMap<LedgerDescriptor, Chain> = HashMap::new();

    while let Some(frame) = wire::read_frame_blocking(&mut input)? {
        let command: Command = match serde_json::from_slice(&frame) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!(error = %e, "invalid command");
                // Answer when the command can still be attributed, so the
                // engine does not wait for a result that never comes.
                if let Ok(header) = serde_json::from_slice::<CommandHeader>(&frame) {
                    let response = Response::Error {
                        request_id: header.request_id,
                        segment_index: header.segment_index,
                        kind: FailureKind::Protocol,
                        message: format!("Invalid command: {e}"),
                    };
                    wire::write_frame_blocking(&mut output, &response, &[])?;
                }
                continue;
            }
        };

        match command {
            Command::RunSegment {
                request_id,
                segment_index,
                segment,
                descriptor,
                job,
            } => {
                tracing::debug!(request_id, segment_index, %segment, job = ?job, "running segment");
                match run_segment(&codec, &mut chains, &descriptor, segment, job.as_ref()) {
                    Ok(payload) => {
                        let response = Response::Payload {
                            request_id,
                            segment_index,
                            length: payload.len(),
                        };
                        wire::write_frame_blocking(&mut output, &response, &payload)?;
                        tracing::debug!(request_id, bytes = payload.len(), "sent segment result");
                    }
                    Err(failure) => {
                        tracing::warn!(
                            request_id,
                            segment_index,
                            kind = ?failure.kind,
                            message = %failure.message,
                            "segment failed"
                        );
                        let response = Response::Error {
                            request_id,
                            segment_index,
                            kind: failure.kind,
                            message: failure.message,
                        };
                        wire::write_frame_blocking(&mut output, &response, &[])?;
                    }
                }
            }
            Command::Exit => {
                tracing::debug!("exiting as requested");
                break;
            }
        }
    }
    tracing::debug!("worker shutting down");
    Ok(())
}

/// Serves commands on stdin, answering on stdout. Logs must go to stderr.
pub fn serve_stdio() -> Result<(), WireError> {
    serve(io::stdin().lock(), io::stdout().lock())
}

fn run_segment(
    codec: &EntityCodec,
    chains: &mut HashMap<LedgerDescriptor, Chain>,
    descriptor: &LedgerDescriptor,
    segment: Segment,
    job: &dyn RangeJob,
) -> Result<Vec<u8>, Failure> {
    let ledger_failure = |e: chainscan_ledger::LedgerError| Failure::new(FailureKind::Ledger, e.to_string());

    let chain = match chains.entry(descriptor.clone()) {
        Entry::Occupied(entry) => entry.get().clone(),
        Entry::Vacant(entry) => {
            let chain = Chain::open(descriptor).map_err(ledger_failure)?;
            tracing::debug!(location = ?descriptor.location, bound = descriptor.bound, "opened ledger");
            entry.insert(chain).clone()
        }
    };
    let blocks = chain
        .slice(segment.start, segment.end)
        .map_err(ledger_failure)?;

    let value = panic::catch_unwind(AssertUnwindSafe(|| job.map(&blocks)))
        .map_err(|panic| Failure::new(FailureKind::Job, panic_message(panic.as_ref())))?
        .map_err(|e| Failure::new(FailureKind::Job, format!("{e:#}")))?;

    codec
        .encode(&value)
        .map_err(|e| Failure::new(FailureKind::Serialization, e.to_string()))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("job panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("job panicked: {message}")
    } else {
        "job panicked".to_string()
    }
}
