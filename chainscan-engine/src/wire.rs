//! Framing between the engine and its worker processes.
//!
//! Every control message is a length-prefixed JSON frame: a `u32`
//! little-endian byte count followed by that many bytes of JSON. A
//! [`Response::Payload`] frame is immediately followed by exactly `length`
//! bytes of encoded segment result.
use std::io::{self, Read, Write};
use std::sync::Arc;

use chainscan_ledger::LedgerDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::job::RangeJob;
use crate::partition::Segment;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    RunSegment {
        request_id: u32,
        segment_index: usize,
        segment: Segment,
        descriptor: LedgerDescriptor,
        job: Arc<dyn RangeJob>,
    },
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The job returned an error or panicked.
    Job,
    /// The job's result could not be encoded.
    Serialization,
    /// The worker could not open or slice the ledger.
    Ledger,
    /// The command could not be understood, e.g. a job type this worker
    /// binary does not link.
    Protocol,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Payload {
        request_id: u32,
        segment_index: usize,
        length: usize,
    },
    Error {
        request_id: u32,
        segment_index: usize,
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Frame IO failed: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed frame: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

fn frame_len(json: &[u8]) -> Result<[u8; 4], WireError> {
    let len = u32::try_from(json.len())
        .map_err(|_| WireError::Protocol(format!("frame of {} bytes is too large", json.len())))?;
    Ok(len.to_le_bytes())
}

fn checked_len(len_buf: [u8; 4]) -> Result<usize, WireError> {
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 {
        return Err(WireError::Protocol("zero-length json frame".to_string()));
    }
    Ok(len)
}

pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), WireError> {
    let json = serde_json::to_vec(value)?;
    writer.write_all(&frame_len(&json)?).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;
    tracing::trace!(len = json.len(), "wrote framed json");
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin, T: DeserializeOwned>(
    reader: &mut R,
) -> Result<T, WireError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = checked_len(len_buf)?;
    tracing::trace!(len, "read framed json length");
    let mut json = vec![0u8; len];
    reader.read_exact(&mut json).await?;
    Ok(serde_json::from_slice(&json)?)
}

pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    length: usize,
) -> Result<Vec<u8>, WireError> {
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Reads the next raw frame, or `None` when the input ends between frames.
pub fn read_frame_blocking<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let mut json = vec![0u8; checked_len(len_buf)?];
    reader.read_exact(&mut json)?;
    Ok(Some(json))
}

/// Writes one frame followed by `payload` and flushes.
pub fn write_frame_blocking<W: Write, T: Serialize>(
    writer: &mut W,
    value: &T,
    payload: &[u8],
) -> Result<(), WireError> {
    let json = serde_json::to_vec(value)?;
    writer.write_all(&frame_len(&json)?)?;
    writer.write_all(&json)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::duplex;

    use super::*;
    use crate::jobs::CollectHeights;

    #[tokio::test]
    async fn framed_json_round_trip() {
        let (mut client, mut server) = duplex(1024 * 1024);

        let send = Command::RunSegment {
            request_id: 42,
            segment_index: 3,
            segment: Segment::new(10, 20),
            descriptor: LedgerDescriptor::new("/data/ledger", 97),
            job: Arc::new(CollectHeights),
        };

        let server_task = tokio::spawn(async move {
            let got: Command = read_frame(&mut server).await.unwrap();
            match got {
                Command::RunSegment {
                    request_id,
                    segment_index,
                    segment,
                    descriptor,
                    ..
                } => {
                    assert_eq!(request_id, 42);
                    assert_eq!(segment_index, 3);
                    assert_eq!(segment, Segment::new(10, 20));
                    assert_eq!(descriptor.bound, 97);
                }
                Command::Exit => panic!("unexpected command"),
            }

            let response = Response::Payload {
                request_id: 42,
                segment_index: 3,
                length: 3,
            };
            write_frame(&mut server, &response).await.unwrap();
            server.write_all(&[1u8, 2u8, 3u8]).await.unwrap();
            server.flush().await.unwrap();
        });

        write_frame(&mut client, &send).await.unwrap();
        let resp: Response = read_frame(&mut client).await.unwrap();
        let Response::Payload {
            request_id, length, ..
        } = resp
        else {
            panic!("unexpected response");
        };
        assert_eq!(request_id, 42);
        assert_eq!(read_payload(&mut client, length).await.unwrap(), vec![1, 2, 3]);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn zero_length_frame_is_rejected() {
        let (mut client, mut server) = duplex(64);
        server.write_all(&0u32.to_le_bytes()).await.unwrap();
        let err = read_frame::<_, Response>(&mut client).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }

    #[test]
    fn blocking_reader_stops_cleanly_between_frames() {
        let mut buffer = Vec::new();
        write_frame_blocking(&mut buffer, &Command::Exit, &[]).unwrap();

        let mut reader = Cursor::new(buffer);
        let frame = read_frame_blocking(&mut reader).unwrap().unwrap();
        let command: Command = serde_json::from_slice(&frame).unwrap();
        assert!(matches!(command, Command::Exit));
        assert!(read_frame_blocking(&mut reader).unwrap().is_none());
    }
}
