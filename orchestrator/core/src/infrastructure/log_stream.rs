// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container Log Streams
//!
//! The engine multiplexes a container's stdout and stderr into one byte
//! stream. Each unit is an 8-byte header followed by its payload:
//!
//! ```text
//! byte 0      stream selector (0 stdin, 1 stdout, 2 stderr)
//! bytes 1..4  reserved
//! bytes 4..8  payload length, big endian u32
//! ```
//!
//! [`LogFrameDecoder`] turns that stream into [`LogFrame`]s and
//! [`LogStreamManager`] owns one forwarding task per container.

use bytes::{Buf, BufMut, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::runtime::{LogFrame, LogSink};

pub const HEADER_LEN: usize = 8;

pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;

/// Decodes multiplexed log frames. Partial frames stay buffered until the
/// rest of the payload arrives.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFrameDecoder;

impl Decoder for LogFrameDecoder {
    type Item = LogFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogFrame>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let selector = src[0];
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        let is_error = match selector {
            0 | STDOUT => false,
            STDERR => true,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown log stream selector {}", other),
                ))
            }
        };

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len);
        let text = String::from_utf8_lossy(&payload)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        Ok(Some(LogFrame { is_error, text }))
    }
}

/// Writes one frame in the engine's multiplexed format.
pub fn encode_frame(selector: u8, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u8(selector);
    dst.put_slice(&[0, 0, 0]);
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
}

struct StreamEntry {
    cancel: CancellationToken,
    generation: u64,
}

type StreamMap = Arc<Mutex<HashMap<String, StreamEntry>>>;

/// At most one forwarding task per container id. An entry lives until its
/// stream is stopped, replaced or reaches end of input.
#[derive(Default)]
pub struct LogStreamManager {
    streams: StreamMap,
    next_generation: AtomicU64,
}

impl LogStreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that decodes `source` and hands every frame to `sink`.
    /// A stream already registered for `container_id` is cancelled first.
    pub fn start<R>(&self, container_id: &str, source: R, sink: Arc<dyn LogSink>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut streams = self.streams.lock();
            if let Some(previous) = streams.remove(container_id) {
                debug!(container_id, "Replacing active log stream");
                previous.cancel.cancel();
            }
            streams.insert(
                container_id.to_string(),
                StreamEntry {
                    cancel: cancel.clone(),
                    generation,
                },
            );
        }

        let id = container_id.to_string();
        let streams = self.streams.clone();
        tokio::spawn(async move {
            forward_frames(&id, source, sink, cancel).await;
            release(&streams, &id, generation);
            debug!(container_id = %id, "Log stream finished");
        });
    }

    /// Cancel the stream for `container_id`. Returns whether one was registered.
    pub fn stop(&self, container_id: &str) -> bool {
        match self.streams.lock().remove(container_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, container_id: &str) -> bool {
        self.streams.lock().contains_key(container_id)
    }

    pub fn close_all(&self) {
        let mut streams = self.streams.lock();
        for (_, entry) in streams.drain() {
            entry.cancel.cancel();
        }
    }
}

/// Drop the entry of a finished task unless a newer stream has taken its place.
fn release(streams: &StreamMap, container_id: &str, generation: u64) {
    let mut streams = streams.lock();
    if streams.get(container_id).map(|entry| entry.generation) == Some(generation) {
        streams.remove(container_id);
    }
}

async fn forward_frames<R>(
    container_id: &str,
    source: R,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut frames = FramedRead::new(source, LogFrameDecoder);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => match next {
                Some(Ok(frame)) => sink.on_frame(frame),
                Some(Err(e)) => {
                    warn!(container_id, error = %e, "Log stream decode failed");
                    break;
                }
                None => break,
            },
        }
    }
}
