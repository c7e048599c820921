// src/rtmp/test_server.rs - Loopback RTMP server and callback recorder for tests
//
// Incoming chunks are decoded with rml_rtmp, so framing and AMF0 bodies are
// checked against an independent implementation.

use crate::rtmp::amf0::{AmfObject, AmfValue};
use crate::rtmp::connect_checker::ConnectChecker;
use crate::rtmp::handshake::{HANDSHAKE_SIZE, RTMP_VERSION};
use crate::rtmp::rtmp_header::{chunk_stream, MessageType};
use crate::rtmp::rtmp_packet::{Command, LimitType, RtmpPacket, UserControlEvent};
use crate::rtmp::session_info::{RtmpSessionInfo, DEFAULT_CHUNK_SIZE};
use rml_rtmp::chunk_io::ChunkDeserializer;
use rml_rtmp::messages::{MessagePayload, RtmpMessage};
use rml_rtmp::rml_amf0::Amf0Value;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every callback.
#[derive(Default)]
pub(crate) struct Recorder {
    pub failures: Mutex<Vec<String>>,
    pub successes: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub auth_errors: AtomicUsize,
    pub auth_successes: AtomicUsize,
    pub bitrates: Mutex<Vec<u64>>,
}

impl Recorder {
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub fn wait_for_failure(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(reason) = self.failures().first() {
                return Some(reason.clone());
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    pub fn wait_for_successes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.successes.load(Ordering::SeqCst) >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl ConnectChecker for Recorder {
    fn on_connection_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
    fn on_connection_failed(&self, reason: &str) {
        self.failures.lock().unwrap().push(reason.to_string());
    }
    fn on_new_bitrate(&self, bitrate: u64) {
        self.bitrates.lock().unwrap().push(bitrate);
    }
    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
    fn on_auth_error(&self) {
        self.auth_errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_auth_success(&self) {
        self.auth_successes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A message received by the fake server.
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub type_id: u8,
    pub stream_id: u32,
    pub data: Vec<u8>,
    pub command: Option<(String, f64, Vec<Amf0Value>)>,
}

impl Received {
    fn from_payload(payload: MessagePayload) -> Self {
        let type_id = payload.type_id;
        let stream_id = payload.message_stream_id;
        let data = payload.data.to_vec();
        let command = if type_id == MessageType::CommandAmf0 as u8 {
            match payload.to_rtmp_message().expect("rtmp message") {
                RtmpMessage::Amf0Command {
                    command_name,
                    transaction_id,
                    command_object,
                    additional_arguments,
                } => {
                    let mut values = vec![command_object];
                    values.extend(additional_arguments);
                    Some((command_name, transaction_id, values))
                }
                _ => None,
            }
        } else {
            None
        };
        Self {
            type_id,
            stream_id,
            data,
            command,
        }
    }

    pub fn command_name(&self) -> Option<&str> {
        self.command.as_ref().map(|(name, _, _)| name.as_str())
    }
}

/// Server end of one accepted connection.
pub(crate) struct ServerConn {
    stream: TcpStream,
    deserializer: ChunkDeserializer,
    session: RtmpSessionInfo,
}

impl ServerConn {
    pub fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = listener.accept().expect("accept");
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut c0c1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        stream.read_exact(&mut c0c1).unwrap();
        assert_eq!(c0c1[0], RTMP_VERSION);
        let mut s0s1s2 = vec![RTMP_VERSION];
        s0s1s2.extend(std::iter::repeat(0x5A).take(HANDSHAKE_SIZE));
        s0s1s2.extend_from_slice(&c0c1[1..]);
        stream.write_all(&s0s1s2).unwrap();
        let mut c2 = vec![0u8; HANDSHAKE_SIZE];
        stream.read_exact(&mut c2).unwrap();
        assert!(c2.iter().all(|b| *b == 0x5A));

        Self {
            stream,
            deserializer: ChunkDeserializer::new(),
            session: RtmpSessionInfo::new(),
        }
    }

    /// Next complete client message, `None` once the client hung up.
    pub fn next_message(&mut self) -> Option<Received> {
        if let Some(payload) = self.deserializer.get_next_message(&[]).expect("deserialize") {
            return Some(Received::from_payload(payload));
        }
        let mut buf = [0u8; 4096];
        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => n,
            };
            if let Some(payload) = self.deserializer.get_next_message(&buf[..n]).expect("deserialize") {
                return Some(Received::from_payload(payload));
            }
        }
    }

    pub fn send(&mut self, packet: RtmpPacket) {
        let channel = self.session.chunk_stream_info_mut(packet.header.chunk_stream_id);
        packet
            .write_to(&mut self.stream, DEFAULT_CHUNK_SIZE, channel)
            .expect("server write");
    }

    pub fn send_command(&mut self, stream_id: u32, command: Command) {
        self.send(RtmpPacket::command(chunk_stream::OVER_CONNECTION, stream_id, command));
    }

    pub fn drain(&mut self) -> Vec<Received> {
        let mut seen = Vec::new();
        while let Some(message) = self.next_message() {
            seen.push(message);
        }
        seen
    }
}

pub(crate) fn status(code: &str, description: &str) -> AmfObject {
    AmfObject::new()
        .with("level", "status")
        .with("code", code)
        .with("description", description)
}

pub(crate) fn connect_success(txn: u32) -> Command {
    Command::new("_result", txn)
        .with_arg(AmfObject::new().with("fmsVer", "FMS/3,0,1,123"))
        .with_arg(status("NetConnection.Connect.Success", "Connection succeeded."))
}

/// Answers connect/createStream/publish like a real server. `publish_code`
/// is the onStatus code returned for `publish`.
pub(crate) fn serve(mut conn: ServerConn, publish_code: &'static str) -> Vec<Received> {
    let mut seen = Vec::new();
    while let Some(message) = conn.next_message() {
        let command = message.command.clone();
        seen.push(message);
        let (name, txn, _) = match command {
            Some(command) => command,
            None => continue,
        };
        match name.as_str() {
            "connect" => {
                conn.send(RtmpPacket::user_control(UserControlEvent::PingRequest(7)));
                conn.send(RtmpPacket::window_ack_size(5_000_000));
                conn.send(RtmpPacket::set_peer_bandwidth(5_000_000, LimitType::Dynamic));
                conn.send_command(0, connect_success(txn as u32));
            }
            "createStream" => conn.send_command(
                0,
                Command::new("_result", txn as u32)
                    .with_arg(AmfValue::Null)
                    .with_arg(1.0),
            ),
            "publish" => conn.send_command(
                1,
                Command::new("onStatus", 0)
                    .with_arg(AmfValue::Null)
                    .with_arg(status(publish_code, "stream busy")),
            ),
            "closeStream" => break,
            _ => {}
        }
    }
    seen
}

/// Loopback listener and a publish URL pointing at it.
pub(crate) fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = listener.local_addr().unwrap().port();
    (listener, format!("rtmp://127.0.0.1:{}/live/stream", port))
}
