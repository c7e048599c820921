// src/rtmp/session_info.rs - Per-connection and per-chunk-stream state
//
// Core features:
// - Lazily created chunk stream entries keyed by chunk stream id
// - Previous rx/tx headers for compact header forms
// - Reassembly buffer for messages spanning several chunks
// - Window acknowledgement accounting
// - Pending invoked commands keyed by transaction id

use crate::rtmp::rtmp_header::{ChunkType, RtmpHeader, EXTENDED_TIMESTAMP_SENTINEL};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::time::Instant;

/// Chunk size both sides start with
pub const DEFAULT_CHUNK_SIZE: u32 = 128;
/// Window before the peer announces one: effectively never acknowledge
pub const DEFAULT_ACK_WINDOW_SIZE: u32 = i32::MAX as u32;

/// State of one chunk stream.
#[derive(Debug, Default)]
pub struct ChunkStreamInfo {
    prev_header_rx: Option<RtmpHeader>,
    prev_header_tx: Option<RtmpHeader>,
    stored_chunks: BytesMut,
}

impl ChunkStreamInfo {
    pub fn prev_header_rx(&self) -> Option<&RtmpHeader> {
        self.prev_header_rx.as_ref()
    }

    pub fn set_prev_header_rx(&mut self, header: RtmpHeader) {
        self.prev_header_rx = Some(header);
    }

    pub fn prev_header_tx(&self) -> Option<&RtmpHeader> {
        self.prev_header_tx.as_ref()
    }

    pub fn set_prev_header_tx(&mut self, header: RtmpHeader) {
        self.prev_header_tx = Some(header);
    }

    /// A message on this chunk stream is partially received.
    pub fn is_rx_in_progress(&self) -> bool {
        !self.stored_chunks.is_empty()
    }

    pub fn stored_len(&self) -> usize {
        self.stored_chunks.len()
    }

    pub fn store_chunk(&mut self, chunk: &[u8]) {
        self.stored_chunks.extend_from_slice(chunk);
    }

    /// Takes the reassembled message body.
    pub fn take_stored_chunks(&mut self) -> Bytes {
        self.stored_chunks.split().freeze()
    }

    /// Drops a partially received message (Abort).
    pub fn clear_stored_chunks(&mut self) {
        self.stored_chunks.clear();
    }

    /// Most compact header form that lets the peer rebuild `header` from the
    /// previous tx header on this chunk stream.
    pub fn compact_chunk_type(&self, header: &RtmpHeader) -> ChunkType {
        let prev = match &self.prev_header_tx {
            Some(prev) => prev,
            None => return ChunkType::Type0,
        };
        if prev.message_stream_id != header.message_stream_id
            || prev.has_extended_timestamp()
            || header.absolute_timestamp < prev.absolute_timestamp
            || header.absolute_timestamp >= EXTENDED_TIMESTAMP_SENTINEL
        {
            return ChunkType::Type0;
        }
        if prev.packet_length == header.packet_length
            && prev.message_type_id == header.message_type_id
        {
            ChunkType::Type2
        } else {
            ChunkType::Type1
        }
    }
}

/// State of one RTMP connection.
#[derive(Debug)]
pub struct RtmpSessionInfo {
    chunk_channels: HashMap<u8, ChunkStreamInfo>,
    rx_chunk_size: u32,
    tx_chunk_size: u32,
    acknowledgement_window_size: u32,
    window_bytes_read: u32,
    total_bytes_read: u32,
    invoked_methods: HashMap<u32, String>,
    started_at: Instant,
}

impl Default for RtmpSessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl RtmpSessionInfo {
    pub fn new() -> Self {
        Self {
            chunk_channels: HashMap::new(),
            rx_chunk_size: DEFAULT_CHUNK_SIZE,
            tx_chunk_size: DEFAULT_CHUNK_SIZE,
            acknowledgement_window_size: DEFAULT_ACK_WINDOW_SIZE,
            window_bytes_read: 0,
            total_bytes_read: 0,
            invoked_methods: HashMap::new(),
            started_at: Instant::now(),
        }
    }

    pub fn chunk_stream_info(&self, chunk_stream_id: u8) -> Option<&ChunkStreamInfo> {
        self.chunk_channels.get(&chunk_stream_id)
    }

    /// Returns the chunk stream entry, creating it on first use.
    pub fn chunk_stream_info_mut(&mut self, chunk_stream_id: u8) -> &mut ChunkStreamInfo {
        self.chunk_channels.entry(chunk_stream_id).or_default()
    }

    pub fn rx_chunk_size(&self) -> u32 {
        self.rx_chunk_size
    }

    pub fn set_rx_chunk_size(&mut self, size: u32) {
        self.rx_chunk_size = size;
    }

    pub fn tx_chunk_size(&self) -> u32 {
        self.tx_chunk_size
    }

    pub fn set_tx_chunk_size(&mut self, size: u32) {
        self.tx_chunk_size = size;
    }

    pub fn acknowledgement_window_size(&self) -> u32 {
        self.acknowledgement_window_size
    }

    pub fn set_acknowledgement_window_size(&mut self, size: u32) {
        self.acknowledgement_window_size = size;
    }

    pub fn total_bytes_read(&self) -> u32 {
        self.total_bytes_read
    }

    /// Accounts `n` received bytes.
    ///
    /// # Returns
    /// * `Some(total)` - The window filled up; acknowledge `total` bytes
    /// * `None` - No acknowledgement due yet
    pub fn add_to_window_bytes_read(&mut self, n: u32) -> Option<u32> {
        self.total_bytes_read = self.total_bytes_read.wrapping_add(n);
        self.window_bytes_read = self.window_bytes_read.saturating_add(n);
        if self.window_bytes_read >= self.acknowledgement_window_size {
            self.window_bytes_read -= self.acknowledgement_window_size;
            Some(self.total_bytes_read)
        } else {
            None
        }
    }

    pub fn add_invoked_command(&mut self, transaction_id: u32, method: impl Into<String>) {
        self.invoked_methods.insert(transaction_id, method.into());
    }

    /// Removes and returns the method that used `transaction_id`.
    pub fn take_invoked_method(&mut self, transaction_id: u32) -> Option<String> {
        self.invoked_methods.remove(&transaction_id)
    }

    /// Milliseconds since the session started, for non-media messages.
    pub fn session_timestamp(&self) -> u32 {
        self.started_at.elapsed().as_millis() as u32
    }
}
