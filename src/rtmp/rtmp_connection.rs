// src/rtmp/rtmp_connection.rs - RTMP client connection and command state machine
//
// Core features:
// - connect: URL parsing, TCP/TLS open, handshake, `connect` command with optional digest auth retry
// - publish: releaseStream/FCPublish/createStream, then `publish` once the stream id arrives
// - Background `rtmp-rx` thread decoding inbound messages and answering protocol control
// - Single send path: every outbound message goes through one locked writer
// - Blocking connect/publish waits built on single-slot crossbeam channels
//
// Lock order is always writer -> session. The rx thread reads from the socket
// without holding any lock and only takes the session lock to decode.

use crate::error::{ConnectionError, Error, ProtocolError, Result};
use crate::rtmp::amf0::{AmfObject, AmfValue};
use crate::rtmp::auth::{AuthChallenge, Credentials};
use crate::rtmp::bitrate::BitrateManager;
use crate::rtmp::connect_checker::ConnectChecker;
use crate::rtmp::endpoint::Endpoint;
use crate::rtmp::handshake::Handshake;
use crate::rtmp::rtmp_decoder::{ReadOutcome, RtmpDecoder};
use crate::rtmp::rtmp_header::{chunk_stream, MessageType, RtmpHeader};
use crate::rtmp::rtmp_packet::{self, Command, Data, PacketBody, RtmpPacket, UserControlEvent};
use crate::rtmp::session_info::{RtmpSessionInfo, DEFAULT_CHUNK_SIZE};
use crate::rtmp::transport::{self, Transport, TransportReader, TransportWriter};
use crate::util::{join_bounded, lock};
use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::io::{BufWriter, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default bound for the connect and publish waits
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const RX_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const JOIN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_BUFFER_SIZE: usize = 16 * 1024;
const FLASH_VERSION: &str = "FMLE/3.0 (compatible; Lavf58.29.100)";

const PUBLISH_PERMIT_FAILED: &str = "Error configure stream, publish permitted failed";

/// Lifecycle of one connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Handshaking = 1,
    ConnectSent = 2,
    Connected = 3,
    StreamCreating = 4,
    Publishing = 5,
    Closing = 6,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::ConnectSent,
            3 => ConnectionState::Connected,
            4 => ConnectionState::StreamCreating,
            5 => ConnectionState::Publishing,
            6 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Width announced in `onMetaData`
    pub video_width: u32,
    /// Height announced in `onMetaData`
    pub video_height: u32,
    pub credentials: Option<Credentials>,
    /// Bound for TCP connect, handshake reads, and the connect/publish waits
    pub wait_timeout: Duration,
    /// Outbound chunk size; anything but 128 is announced with SetChunkSize
    pub chunk_size: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            video_width: 720,
            video_height: 1280,
            credentials: None,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// What the rx thread reports to a pending `connect`.
#[derive(Debug)]
enum ConnectEvent {
    Connected,
    Failed(String),
    AuthFailed(String),
    AuthChallenge(AuthChallenge),
}

/// What the rx thread reports to a pending `publish`.
#[derive(Debug)]
enum PublishEvent {
    Started,
    Rejected(String),
}

/// State shared between the caller-facing handle and the rx thread.
struct Shared {
    checker: Arc<dyn ConnectChecker>,
    state: AtomicU8,
    running: AtomicBool,
    writer: Mutex<Option<BufWriter<TransportWriter>>>,
    session: Mutex<RtmpSessionInfo>,
    socket: Mutex<Option<TcpStream>>,
    stream_id: AtomicU32,
    next_transaction_id: AtomicU32,
    // (stream name, publish type)
    publish_target: Mutex<Option<(String, String)>>,
    config: Mutex<ConnectionConfig>,
    connect_slot: Mutex<Option<Sender<ConnectEvent>>>,
    publish_slot: Mutex<Option<Sender<PublishEvent>>>,
    bitrate: Mutex<BitrateManager>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn next_transaction_id(&self) -> u32 {
        self.next_transaction_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Sends a control, command or data packet stamped with the session clock.
    ///
    /// Commands with a non-zero transaction id are remembered so that the
    /// matching `_result`/`_error` can be routed back to their method.
    fn send_packet(&self, packet: &RtmpPacket) -> Result<()> {
        let body = packet.encode_body()?;
        if let PacketBody::Command(command) = &packet.body {
            if command.transaction_id != 0 {
                lock(&self.session).add_invoked_command(command.transaction_id, command.name.clone());
            }
            debug!("Sending command '{}' (transaction {})", command.name, command.transaction_id);
        }
        self.send_message(packet.header.clone(), &body, true)
    }

    fn send_message(&self, mut header: RtmpHeader, body: &[u8], stamp_session_time: bool) -> Result<()> {
        let mut guard = lock(&self.writer);
        let writer = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        {
            let mut session = lock(&self.session);
            if stamp_session_time {
                header.absolute_timestamp = session.session_timestamp();
            }
            header.packet_length = body.len() as u32;
            let chunk_size = session.tx_chunk_size();
            let channel = session.chunk_stream_info_mut(header.chunk_stream_id);
            header.chunk_type = channel.compact_chunk_type(&header);
            rtmp_packet::write_chunked(writer, &header, body, chunk_size, channel)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Ends the session after a socket or protocol failure.
    ///
    /// Only the first failure is reported; a connection already torn down
    /// by the caller reports nothing.
    fn fail(&self, reason: &str) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        error!("{reason}");
        if let Some(socket) = lock(&self.socket).as_ref() {
            transport::shutdown_socket(socket);
        }
        self.set_state(ConnectionState::Disconnected);
        lock(&self.connect_slot).take();
        lock(&self.publish_slot).take();
        self.checker.on_connection_failed(reason);
    }

    fn signal_connect(&self, event: ConnectEvent) {
        match lock(&self.connect_slot).as_ref() {
            Some(slot) => {
                if slot.try_send(event).is_err() {
                    debug!("Connect result already delivered");
                }
            }
            None => debug!("No connect pending for {:?}", event),
        }
    }

    fn signal_publish(&self, event: PublishEvent) {
        match lock(&self.publish_slot).as_ref() {
            Some(slot) => {
                if slot.try_send(event).is_err() {
                    debug!("Publish result already delivered");
                }
            }
            None => debug!("No publish pending for {:?}", event),
        }
    }

    // ========================================================================
    // Inbound dispatch
    // ========================================================================

    fn handle_packet(&self, packet: RtmpPacket) -> Result<()> {
        match packet.body {
            // The decoder already dropped the partial message.
            PacketBody::Abort(chunk_stream_id) => debug!("Abort on chunk stream {chunk_stream_id}"),
            PacketBody::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                debug!("Ping request {timestamp}, sending pong");
                self.send_packet(&RtmpPacket::user_control(UserControlEvent::PingResponse(timestamp)))?;
            }
            PacketBody::UserControl(UserControlEvent::StreamEof(stream_id)) => {
                info!("Stream {stream_id} EOF reached");
            }
            PacketBody::UserControl(event) => debug!("User control event: {:?}", event),
            PacketBody::WindowAckSize(size) => {
                info!("Setting acknowledgement window size: {size}");
                lock(&self.session).set_acknowledgement_window_size(size);
            }
            PacketBody::SetPeerBandwidth { window_size, limit_type } => {
                debug!("Peer bandwidth {window_size} ({:?}), echoing window size", limit_type);
                self.send_packet(&RtmpPacket::window_ack_size(window_size))?;
            }
            PacketBody::SetChunkSize(size) => {
                if size == 0 {
                    return Err(ProtocolError::InvalidChunkSize(size).into());
                }
                info!("Server chunk size: {size}");
                lock(&self.session).set_rx_chunk_size(size);
            }
            PacketBody::Acknowledgement(bytes) => debug!("Server acknowledged {bytes} bytes"),
            PacketBody::Command(command) => self.handle_command(command)?,
            PacketBody::Data(data) => debug!("Ignoring data message '{}'", data.data_type),
            PacketBody::Audio(_) | PacketBody::Video(_) | PacketBody::Unhandled(_) => debug!(
                "Not handling message of type {:#04x}",
                packet.header.message_type_id
            ),
        }
        Ok(())
    }

    fn handle_command(&self, command: Command) -> Result<()> {
        match command.name.as_str() {
            "_result" => {
                let method = lock(&self.session).take_invoked_method(command.transaction_id);
                debug!("Got result for invoked method: {:?}", method);
                match method.as_deref() {
                    Some("connect") => self.signal_connect(ConnectEvent::Connected),
                    Some("createStream") => self.on_stream_created(&command)?,
                    Some(_) => {}
                    None => warn!("_result for unknown transaction {}", command.transaction_id),
                }
            }
            "_error" => {
                let method = lock(&self.session).take_invoked_method(command.transaction_id);
                let description = command
                    .info_str("description")
                    .or_else(|| command.info_str("code"))
                    .unwrap_or_default()
                    .to_string();
                match method.as_deref() {
                    Some("connect") => {
                        let event = self.classify_connect_error(&description);
                        // The server usually hangs up next; that is not a second failure.
                        self.running.store(false, Ordering::Release);
                        self.signal_connect(event);
                    }
                    Some("createStream") => self.reject_publish(description),
                    Some(other) => warn!("Server rejected '{other}': {description}"),
                    None => warn!("_error for unknown transaction {}: {description}", command.transaction_id),
                }
            }
            "onStatus" => self.on_status(&command)?,
            "onBWDone" | "onFCPublish" | "_checkbw" => debug!("Server invoke '{}'", command.name),
            other => debug!("Unknown/unhandled server invoke: {other}"),
        }
        Ok(())
    }

    fn classify_connect_error(&self, description: &str) -> ConnectEvent {
        let has_credentials = lock(&self.config).credentials.is_some();
        if description.contains("reason=authfailed") {
            ConnectEvent::AuthFailed(description.to_string())
        } else if has_credentials && description.contains("challenge=") && description.contains("salt=") {
            match AuthChallenge::parse(description) {
                Some(challenge) => ConnectEvent::AuthChallenge(challenge),
                None => ConnectEvent::Failed(description.to_string()),
            }
        } else if description.contains("code=403") && !has_credentials {
            ConnectEvent::AuthFailed(description.to_string())
        } else {
            ConnectEvent::Failed(description.to_string())
        }
    }

    fn on_stream_created(&self, command: &Command) -> Result<()> {
        let stream_id = match command.arguments.iter().find_map(AmfValue::as_number) {
            Some(id) => id as u32,
            None => {
                self.reject_publish("createStream returned no stream id".to_string());
                return Ok(());
            }
        };
        info!("Stream ID to publish: {stream_id}");
        self.stream_id.store(stream_id, Ordering::Release);

        let target = lock(&self.publish_target).clone();
        if let Some((stream_name, publish_type)) = target {
            let publish = Command::new("publish", 0)
                .with_arg(AmfValue::Null)
                .with_arg(stream_name)
                .with_arg(publish_type);
            self.send_packet(&RtmpPacket::command(chunk_stream::OVER_STREAM, stream_id, publish))?;
        }
        Ok(())
    }

    fn on_status(&self, command: &Command) -> Result<()> {
        let code = command.info_str("code").unwrap_or_default();
        info!("onStatus {code}");
        if code == "NetStream.Publish.Start" {
            self.send_metadata()?;
            self.set_state(ConnectionState::Publishing);
            self.signal_publish(PublishEvent::Started);
        } else if code == "NetConnection.Connect.Rejected"
            || code.ends_with(".Failed")
            || code.ends_with(".BadName")
        {
            let description = command.info_str("description").unwrap_or(code).to_string();
            match self.state() {
                ConnectionState::Publishing => self.fail(&format!("Publish rejected: {description}")),
                ConnectionState::ConnectSent => {
                    self.running.store(false, Ordering::Release);
                    self.signal_connect(ConnectEvent::Failed(description));
                }
                _ => self.reject_publish(description),
            }
        }
        Ok(())
    }

    fn reject_publish(&self, description: String) {
        self.running.store(false, Ordering::Release);
        self.signal_publish(PublishEvent::Rejected(description));
    }

    fn send_metadata(&self) -> Result<()> {
        let (width, height) = {
            let config = lock(&self.config);
            (config.video_width, config.video_height)
        };
        let stream_id = self.stream_id.load(Ordering::Acquire);
        let properties = AmfObject::new()
            .with("duration", 0.0)
            .with("width", width)
            .with("height", height)
            .with("videocodecid", 7.0)
            .with("framerate", 30.0)
            .with("videodatarate", 0.0)
            .with("audiocodecid", 10.0)
            .with("audiosamplerate", 44100.0)
            .with("audiosamplesize", 16.0)
            .with("audiodatarate", 0.0)
            .with("stereo", true)
            .with("filesize", 0.0);
        let metadata = Data::new("@setDataFrame")
            .with_value("onMetaData")
            .with_value(AmfValue::EcmaArray(properties));
        debug!("Sending onMetaData {width}x{height}");
        self.send_packet(&RtmpPacket::data(chunk_stream::OVER_STREAM, stream_id, metadata))
    }
}

fn rx_loop(shared: Arc<Shared>, mut reader: TransportReader) {
    let mut decoder = RtmpDecoder::new();
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut scratch = vec![0u8; READ_BUFFER_SIZE];

    while shared.running.load(Ordering::Acquire) {
        match reader.read(&mut scratch) {
            Ok(0) => {
                shared.fail("Error reading packet: connection closed by server");
                break;
            }
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
            Err(e) if transport::is_timeout(&e) => continue,
            Err(e) => {
                shared.fail(&format!("Error reading packet: {e}"));
                break;
            }
        }

        loop {
            let outcome = {
                let mut session = lock(&shared.session);
                decoder.read_packet(&mut buf, &mut session)
            };
            let handled = match outcome {
                Ok(ReadOutcome::NeedMoreData) => break,
                Ok(ReadOutcome::AckRequired(total)) => {
                    debug!("Acknowledging {total} bytes");
                    shared.send_packet(&RtmpPacket::acknowledgement(total))
                }
                Ok(ReadOutcome::Packet(packet)) => shared.handle_packet(packet),
                Err(e) => Err(e),
            };
            if let Err(e) = handled {
                shared.fail(&format!("Error reading packet: {e}"));
                return;
            }
        }
    }
    debug!("Thread[rtmp-rx] exited");
}

fn wait<T>(receiver: &Receiver<T>, timeout: Duration, what: &'static str) -> Result<T> {
    match receiver.recv_timeout(timeout) {
        Ok(event) => Ok(event),
        Err(RecvTimeoutError::Timeout) => Err(ConnectionError::Timeout(what).into()),
        Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::Cancelled(what).into()),
    }
}

/// A publishing RTMP client connection.
///
/// `connect` and `publish` block until the server answers or the configured
/// wait expires. Media can be sent from any thread once publishing.
///
/// # Example
/// ```rust,ignore
/// let connection = RtmpConnection::new(checker);
/// connection.connect("rtmp://localhost/live/stream")?;
/// connection.publish("live")?;
/// connection.publish_video_data(&flv_tag, 0)?;
/// connection.close();
/// ```
pub struct RtmpConnection {
    shared: Arc<Shared>,
    endpoint: Mutex<Option<Endpoint>>,
    rx_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RtmpConnection {
    pub fn new(checker: Arc<dyn ConnectChecker>) -> Self {
        Self::with_config(checker, ConnectionConfig::default())
    }

    pub fn with_config(checker: Arc<dyn ConnectChecker>, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                bitrate: Mutex::new(BitrateManager::new(Arc::clone(&checker))),
                checker,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                running: AtomicBool::new(false),
                writer: Mutex::new(None),
                session: Mutex::new(RtmpSessionInfo::new()),
                socket: Mutex::new(None),
                stream_id: AtomicU32::new(0),
                next_transaction_id: AtomicU32::new(1),
                publish_target: Mutex::new(None),
                config: Mutex::new(config),
                connect_slot: Mutex::new(None),
                publish_slot: Mutex::new(None),
            }),
            endpoint: Mutex::new(None),
            rx_handle: Mutex::new(None),
        }
    }

    /// Resolution announced in `onMetaData` on the next publish.
    pub fn set_video_resolution(&self, width: u32, height: u32) {
        let mut config = lock(&self.shared.config);
        config.video_width = width;
        config.video_height = height;
    }

    /// Credentials for Adobe digest authentication, kept across reconnects.
    pub fn set_authorization(&self, user: impl Into<String>, password: impl Into<String>) {
        lock(&self.shared.config).credentials = Some(Credentials::new(user, password));
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Stream id assigned by `createStream`, 0 before that.
    pub fn stream_id(&self) -> u32 {
        self.shared.stream_id.load(Ordering::Acquire)
    }

    /// Parsed target of the last `connect`.
    pub fn endpoint(&self) -> Option<Endpoint> {
        lock(&self.endpoint).clone()
    }

    // ========================================================================
    // Connect
    // ========================================================================

    /// Connects to `url` and waits for the server to accept the `connect`
    /// command.
    ///
    /// Every failure is also reported through the [`ConnectChecker`]: auth
    /// problems via `on_auth_error`, everything else via
    /// `on_connection_failed`.
    pub fn connect(&self, url: &str) -> Result<()> {
        let endpoint = match Endpoint::parse(url) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("{e}");
                self.shared.checker.on_connection_failed(&e.to_string());
                return Err(e.into());
            }
        };
        if self.state() != ConnectionState::Disconnected {
            let e = ConnectionError::AlreadyConnected;
            self.shared.checker.on_connection_failed(&e.to_string());
            return Err(e.into());
        }
        self.teardown();

        info!(
            "Connecting to {}:{}, app: {}, stream: {}",
            endpoint.host, endpoint.port, endpoint.app_name, endpoint.stream_name
        );
        *lock(&self.endpoint) = Some(endpoint.clone());

        let credentials = lock(&self.shared.config).credentials.clone();
        let query = credentials
            .as_ref()
            .map(Credentials::initial_query)
            .unwrap_or_default();

        let mut outcome = self.connect_attempt(&endpoint, &query);
        let mut retried = false;
        if let (Ok(ConnectEvent::AuthChallenge(challenge)), Some(credentials)) = (&outcome, &credentials) {
            info!("Server requested authentication, reconnecting with digest response");
            let query = credentials.response_query(challenge);
            self.teardown();
            retried = true;
            outcome = self.connect_attempt(&endpoint, &query);
        }
        self.finish_connect(outcome, retried)
    }

    fn connect_attempt(&self, endpoint: &Endpoint, query: &str) -> Result<ConnectEvent> {
        let shared = &self.shared;
        let config = lock(&shared.config).clone();

        shared.set_state(ConnectionState::Handshaking);
        let transport = Transport::open(endpoint, config.wait_timeout)?;
        debug!("Socket connection established, doing handshake...");
        Handshake::new().perform(&mut transport.reader()?, &mut transport.writer()?)?;
        debug!("Handshake complete");
        transport.set_read_timeout(Some(RX_POLL_TIMEOUT))?;

        *lock(&shared.session) = RtmpSessionInfo::new();
        shared.stream_id.store(0, Ordering::Release);
        shared.next_transaction_id.store(1, Ordering::Release);
        *lock(&shared.socket) = Some(transport.closer()?);
        *lock(&shared.writer) = Some(BufWriter::new(transport.writer()?));
        let (slot, receiver) = bounded(1);
        *lock(&shared.connect_slot) = Some(slot);
        shared.running.store(true, Ordering::Release);

        let rx_shared = Arc::clone(shared);
        let reader = transport.reader()?;
        let handle = thread::Builder::new()
            .name("rtmp-rx".to_string())
            .spawn(move || rx_loop(rx_shared, reader))
            .map_err(|e| {
                error!("Thread[rtmp-rx] exited with error: {e}");
                Error::ThreadExited
            })?;
        *lock(&self.rx_handle) = Some(handle);

        if config.chunk_size != DEFAULT_CHUNK_SIZE {
            shared.send_packet(&RtmpPacket::set_chunk_size(config.chunk_size))?;
            lock(&shared.session).set_tx_chunk_size(config.chunk_size);
        }

        let properties = AmfObject::new()
            .with("app", format!("{}{}", endpoint.app_name, query))
            .with("flashVer", FLASH_VERSION)
            .with("type", "nonprivate")
            .with("tcUrl", format!("{}{}", endpoint.tc_url, query));
        let connect = Command::new("connect", shared.next_transaction_id()).with_arg(properties);
        shared.set_state(ConnectionState::ConnectSent);
        shared.send_packet(&RtmpPacket::command(chunk_stream::OVER_CONNECTION, 0, connect))?;

        wait(&receiver, config.wait_timeout, "connect")
    }

    fn finish_connect(&self, outcome: Result<ConnectEvent>, retried: bool) -> Result<()> {
        let checker = &self.shared.checker;
        match outcome {
            Ok(ConnectEvent::Connected) => {
                let connected = self
                    .shared
                    .transition(ConnectionState::ConnectSent, ConnectionState::Connected);
                if !connected || !self.shared.running.load(Ordering::Acquire) {
                    // The rx thread already reported why.
                    self.teardown();
                    return Err(ConnectionError::Cancelled("connect").into());
                }
                info!("RTMP connected");
                if retried {
                    checker.on_auth_success();
                }
                Ok(())
            }
            Ok(ConnectEvent::AuthFailed(description)) => {
                self.teardown();
                warn!("Auth error: {description}");
                checker.on_auth_error();
                Err(ConnectionError::AuthFailed(description).into())
            }
            Ok(ConnectEvent::AuthChallenge(_)) => {
                self.teardown();
                warn!("Server repeated the authentication challenge");
                checker.on_auth_error();
                Err(ConnectionError::AuthFailed("authentication challenge repeated".to_string()).into())
            }
            Ok(ConnectEvent::Failed(description)) => {
                self.teardown();
                checker.on_connection_failed(&description);
                Err(ConnectionError::Failed(description).into())
            }
            Err(e @ Error::Connection(ConnectionError::Cancelled(_))) => {
                self.teardown();
                Err(e)
            }
            Err(Error::Connection(e)) => {
                self.teardown();
                error!("{e}");
                checker.on_connection_failed(&e.to_string());
                Err(e.into())
            }
            Err(e) => {
                self.teardown();
                let reason = format!("Connect error, {e}");
                error!("{reason}");
                checker.on_connection_failed(&reason);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Publish
    // ========================================================================

    /// Creates a stream and publishes it with `publish_type` ("live",
    /// "record" or "append"), waiting for `NetStream.Publish.Start`.
    pub fn publish(&self, publish_type: &str) -> Result<()> {
        let shared = &self.shared;
        let state = shared.state();
        let stream_id = self.stream_id();
        if state != ConnectionState::Connected || stream_id != 0 {
            let reason = format!("Create stream failed, state={:?}, StreamId={}", state, stream_id);
            error!("{reason}");
            shared.checker.on_connection_failed(&reason);
            return Err(ConnectionError::NotConnected.into());
        }
        let stream_name = lock(&self.endpoint)
            .as_ref()
            .map(|e| e.stream_name.clone())
            .ok_or(ConnectionError::NotConnected)?;

        *lock(&shared.publish_target) = Some((stream_name.clone(), publish_type.to_string()));
        let (slot, receiver) = bounded(1);
        *lock(&shared.publish_slot) = Some(slot);
        shared.set_state(ConnectionState::StreamCreating);
        let wait_timeout = lock(&shared.config).wait_timeout;

        let outcome = self
            .send_create_stream(&stream_name)
            .and_then(|()| wait(&receiver, wait_timeout, "publish"));
        match outcome {
            Ok(PublishEvent::Started) => {
                info!("Publishing '{stream_name}' ({publish_type})");
                Ok(())
            }
            Ok(PublishEvent::Rejected(description)) => {
                self.teardown();
                error!("Publish rejected: {description}");
                shared.checker.on_connection_failed(&description);
                Err(ConnectionError::Rejected(description).into())
            }
            Err(e @ Error::Connection(ConnectionError::Cancelled(_))) => {
                self.teardown();
                Err(e)
            }
            Err(e @ Error::Connection(ConnectionError::Timeout(_))) => {
                self.teardown();
                error!("{PUBLISH_PERMIT_FAILED}");
                shared.checker.on_connection_failed(PUBLISH_PERMIT_FAILED);
                Err(e)
            }
            Err(e) => {
                self.teardown();
                let reason = format!("Error send packet: {e}");
                error!("{reason}");
                shared.checker.on_connection_failed(&reason);
                Err(e)
            }
        }
    }

    fn send_create_stream(&self, stream_name: &str) -> Result<()> {
        let shared = &self.shared;
        for method in ["releaseStream", "FCPublish"] {
            let command = Command::new(method, shared.next_transaction_id())
                .with_arg(AmfValue::Null)
                .with_arg(stream_name);
            shared.send_packet(&RtmpPacket::command(chunk_stream::OVER_STREAM, 0, command))?;
        }
        let create_stream =
            Command::new("createStream", shared.next_transaction_id()).with_arg(AmfValue::Null);
        shared.send_packet(&RtmpPacket::command(chunk_stream::OVER_CONNECTION, 0, create_stream))
    }

    // ========================================================================
    // Media
    // ========================================================================

    /// Sends one FLV video tag body with decode timestamp `dts` (ms).
    ///
    /// # Returns
    /// * `Ok(true)` - The message was written
    /// * `Ok(false)` - Skipped: empty data, negative timestamp, or not publishing
    /// * `Err(_)` - The write failed; the connection has been shut down and reported
    pub fn publish_video_data(&self, data: &[u8], dts: i64) -> Result<bool> {
        self.publish_media(MessageType::Video, data, dts)
    }

    /// Sends one FLV audio tag body with decode timestamp `dts` (ms).
    pub fn publish_audio_data(&self, data: &[u8], dts: i64) -> Result<bool> {
        self.publish_media(MessageType::Audio, data, dts)
    }

    fn publish_media(&self, message_type: MessageType, data: &[u8], dts: i64) -> Result<bool> {
        if data.is_empty() || dts < 0 || self.state() != ConnectionState::Publishing {
            return Ok(false);
        }
        let header = rtmp_packet::media_header(message_type, dts as u32, self.stream_id());
        if let Err(e) = self.shared.send_message(header, data, false) {
            self.shared.fail(&format!("Error send packet: {e}"));
            return Err(e);
        }
        lock(&self.shared.bitrate).calculation_bitrate(data.len());
        Ok(true)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Sends `closeStream` when publishing, then shuts the connection down.
    pub fn close(&self) {
        // The server may hang up as soon as it sees closeStream.
        let publishing = self.state() == ConnectionState::Publishing;
        self.shared.running.store(false, Ordering::Release);
        if publishing {
            let close_stream = Command::new("closeStream", 0).with_arg(AmfValue::Null);
            let packet = RtmpPacket::command(chunk_stream::OVER_STREAM, self.stream_id(), close_stream);
            if let Err(e) = self.shared.send_packet(&packet) {
                debug!("closeStream not sent: {e}");
            }
        }
        self.shared.set_state(ConnectionState::Closing);
        self.teardown();
        info!("RTMP connection closed");
    }

    /// Stops the rx thread and releases the socket without reporting anything.
    fn teardown(&self) {
        let shared = &self.shared;
        shared.running.store(false, Ordering::Release);
        lock(&shared.connect_slot).take();
        lock(&shared.publish_slot).take();
        if let Some(socket) = lock(&shared.socket).take() {
            transport::shutdown_socket(&socket);
        }
        lock(&shared.writer).take();
        if let Some(handle) = lock(&self.rx_handle).take() {
            join_bounded(handle, "rtmp-rx", JOIN_TIMEOUT);
        }
        shared.set_state(ConnectionState::Disconnected);
        shared.stream_id.store(0, Ordering::Release);
        lock(&shared.publish_target).take();
        lock(&shared.bitrate).reset();
    }
}

impl Drop for RtmpConnection {
    fn drop(&mut self) {
        self.teardown();
    }
}
