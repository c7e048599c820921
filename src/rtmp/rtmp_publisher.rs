// src/rtmp/rtmp_publisher.rs - Publisher control surface
//
// Core features:
// - start/stop/reconnect lifecycle around one RtmpConnection
// - Sender thread draining the muxer's audio and video queues into the connection
// - Retry budget restored after every successful publish
// - Sent/dropped frame counters with individual resets
//
// Threads:
// - rtmp-publisher-sender: connect + publish, then the send loop
// - rtmp-reconnect: one-shot delayed restart, cancelled by stop()/reconnect()

use crate::error::{BuildError, ConnectionError, Error, QueueError, Result};
use crate::flv::avc::profile_iop;
use crate::flv::flv_frame::{FlvFrame, FlvTagType, SampleInfo};
use crate::flv::flv_muxer::FlvMuxer;
use crate::flv::frame_queue::DEFAULT_QUEUE_CAPACITY;
use crate::rtmp::auth::Credentials;
use crate::rtmp::connect_checker::ConnectChecker;
use crate::rtmp::rtmp_connection::{ConnectionConfig, ConnectionState, RtmpConnection, DEFAULT_WAIT_TIMEOUT};
use crate::rtmp::session_info::DEFAULT_CHUNK_SIZE;
use crate::util::{join_bounded, lock};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const STATUS_INIT: usize = 0;
const STATUS_RUN: usize = 1;
const STATUS_END: usize = 2;

const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(1);
const SENDER_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub video_width: u32,
    pub video_height: u32,
    pub sample_rate: u32,
    pub stereo: bool,
    /// Compatibility byte of the AVC configuration record
    pub profile_iop: u8,
    /// Reconnect attempts granted after each successful publish
    pub retries: u32,
    /// Frames each media queue holds before dropping
    pub queue_capacity: usize,
    pub wait_timeout: Duration,
    pub chunk_size: u32,
    /// "live", "record" or "append"
    pub publish_type: String,
    pub credentials: Option<Credentials>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            video_width: 720,
            video_height: 1280,
            sample_rate: 44100,
            stereo: true,
            profile_iop: profile_iop::BASELINE,
            retries: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            publish_type: "live".to_string(),
            credentials: None,
        }
    }
}

/// Builder for [`RtmpPublisher`].
///
/// # Example
///
/// ```rust,ignore
/// let publisher = RtmpPublisher::builder()
///     .connect_checker(Arc::new(MyChecker))
///     .video_resolution(1280, 720)
///     .retries(3)
///     .build()?;
/// publisher.start("rtmp://localhost/live/stream")?;
/// ```
pub struct PublisherBuilder {
    checker: Option<Arc<dyn ConnectChecker>>,
    config: PublisherConfig,
}

impl Default for PublisherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PublisherBuilder {
    pub fn new() -> Self {
        Self {
            checker: None,
            config: PublisherConfig::default(),
        }
    }

    /// Sets the callback sink. Required.
    pub fn connect_checker(mut self, checker: Arc<dyn ConnectChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Replaces every setting at once.
    pub fn config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolution announced in `onMetaData`.
    pub fn video_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.video_width = width;
        self.config.video_height = height;
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    pub fn stereo(mut self, stereo: bool) -> Self {
        self.config.stereo = stereo;
        self
    }

    pub fn profile_iop(mut self, profile_iop: u8) -> Self {
        self.config.profile_iop = profile_iop;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Bound for connecting and for each command round trip.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    pub fn chunk_size(mut self, chunk_size: u32) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn publish_type(mut self, publish_type: impl Into<String>) -> Self {
        self.config.publish_type = publish_type.into();
        self
    }

    pub fn authorization(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some(Credentials::new(user, password));
        self
    }

    /// Builds the publisher.
    ///
    /// # Errors
    /// - `MissingParameter("connect_checker")` when no callback sink was set
    /// - `QueueError::ZeroCapacity` for a zero queue capacity
    pub fn build(self) -> Result<RtmpPublisher> {
        let checker = self
            .checker
            .ok_or(BuildError::MissingParameter("connect_checker"))?;
        if self.config.queue_capacity == 0 {
            return Err(QueueError::ZeroCapacity.into());
        }
        Ok(RtmpPublisher::with_config(checker, self.config))
    }
}

struct Inner {
    checker: Arc<dyn ConnectChecker>,
    connection: RtmpConnection,
    muxer: FlvMuxer,
    publish_type: String,
    status: AtomicUsize,
    /// Bumped on every stop so a sender from an earlier start exits.
    generation: AtomicU64,
    url: Mutex<Option<String>>,
    sender: Mutex<Option<JoinHandle<()>>>,
    reconnect_cancel: Mutex<Option<Sender<()>>>,
    num_retry: AtomicU32,
    re_tries: AtomicU32,
    sent_audio_frames: AtomicU64,
    sent_video_frames: AtomicU64,
}

impl Inner {
    fn spawn_sender(inner: &Arc<Inner>, url: String) -> Result<()> {
        let mut sender = lock(&inner.sender);
        if sender.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("RTMP publisher already running");
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if let Some(finished) = sender.take() {
            join_bounded(finished, "rtmp-publisher-sender", SENDER_JOIN_TIMEOUT);
        }

        inner.status.store(STATUS_RUN, Ordering::Release);
        let generation = inner.generation.load(Ordering::Acquire);
        let sender_inner = Arc::clone(inner);
        let handle = thread::Builder::new()
            .name("rtmp-publisher-sender".to_string())
            .spawn(move || sender_inner.run_sender(&url, generation))
            .map_err(|e| {
                error!("Thread[rtmp-publisher-sender] exited with error: {e}");
                inner.status.store(STATUS_END, Ordering::Release);
                Error::ThreadExited
            })?;
        *sender = Some(handle);
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.status.load(Ordering::Acquire) == STATUS_RUN
            && self.generation.load(Ordering::Acquire) == generation
    }

    fn run_sender(&self, url: &str, generation: u64) {
        let published = self
            .connection
            .connect(url)
            .and_then(|()| self.connection.publish(&self.publish_type));
        if let Err(e) = published {
            // Already reported through the checker.
            debug!("Publish setup failed: {e}");
            return;
        }
        if !self.is_current(generation) {
            self.connection.close();
            return;
        }

        self.re_tries
            .store(self.num_retry.load(Ordering::Acquire), Ordering::Release);
        self.checker.on_connection_success();
        info!("RTMP publisher streaming to {url}");

        while self.is_current(generation) && self.is_publishing() {
            if let Some(frame) = self.muxer.audio_queue().poll(QUEUE_POLL_TIMEOUT) {
                if !self.send_frame(frame) {
                    break;
                }
            }
            if let Some(frame) = self.muxer.video_queue().poll(QUEUE_POLL_TIMEOUT) {
                if !self.send_frame(frame) {
                    break;
                }
            }
        }

        // The connection went away on its own: the session is over until
        // start() or reconnect().
        if self.generation.load(Ordering::Acquire) == generation {
            let _ = self.status.compare_exchange(
                STATUS_RUN,
                STATUS_END,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        debug!("Thread[rtmp-publisher-sender] exiting");
    }

    fn is_publishing(&self) -> bool {
        self.connection.state() == ConnectionState::Publishing
    }

    /// Sends one frame. Returns `false` once the connection can no longer
    /// carry media; the frame is then counted as dropped.
    fn send_frame(&self, frame: FlvFrame) -> bool {
        let (sent, counter, queue) = match frame.tag_type {
            FlvTagType::Video => (
                self.connection.publish_video_data(frame.tag.as_slice(), frame.dts),
                &self.sent_video_frames,
                self.muxer.video_queue(),
            ),
            FlvTagType::Audio => (
                self.connection.publish_audio_data(frame.tag.as_slice(), frame.dts),
                &self.sent_audio_frames,
                self.muxer.audio_queue(),
            ),
        };
        let alive = match sent {
            Ok(true) => {
                counter.fetch_add(1, Ordering::Relaxed);
                true
            }
            // Empty tag or negative timestamp while still publishing
            Ok(false) if self.is_publishing() => true,
            Ok(false) => {
                queue.record_dropped();
                false
            }
            Err(e) => {
                debug!("Frame at {}ms not sent: {e}", frame.dts);
                queue.record_dropped();
                false
            }
        };
        self.muxer.release(frame);
        alive
    }

    /// Stops everything without reporting `on_disconnect`.
    fn shutdown(&self) {
        lock(&self.reconnect_cancel).take();
        self.status.store(STATUS_END, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        self.connection.close();
        if let Some(handle) = lock(&self.sender).take() {
            join_bounded(handle, "rtmp-publisher-sender", SENDER_JOIN_TIMEOUT);
        }
        self.muxer.clear_queues();
        self.muxer.reset();
    }
}

/// RTMP publisher
///
/// Feeds encoder output through the FLV muxer to an RTMP server. All methods
/// take `&self`; share the publisher behind an `Arc` to call `reconnect` from
/// a [`ConnectChecker`] callback.
pub struct RtmpPublisher {
    inner: Arc<Inner>,
}

impl RtmpPublisher {
    /// Creates a publisher with default settings.
    pub fn new(checker: Arc<dyn ConnectChecker>) -> Self {
        Self::with_config(checker, PublisherConfig::default())
    }

    pub fn builder() -> PublisherBuilder {
        PublisherBuilder::new()
    }

    pub fn with_config(checker: Arc<dyn ConnectChecker>, config: PublisherConfig) -> Self {
        let connection = RtmpConnection::with_config(
            Arc::clone(&checker),
            ConnectionConfig {
                video_width: config.video_width,
                video_height: config.video_height,
                credentials: config.credentials,
                wait_timeout: config.wait_timeout,
                chunk_size: config.chunk_size,
            },
        );
        let muxer = FlvMuxer::new(config.queue_capacity.max(1));
        muxer.set_sample_rate(config.sample_rate);
        muxer.set_is_stereo(config.stereo);
        muxer.set_profile_iop(config.profile_iop);

        Self {
            inner: Arc::new(Inner {
                checker,
                connection,
                muxer,
                publish_type: config.publish_type,
                status: AtomicUsize::new(STATUS_INIT),
                generation: AtomicU64::new(0),
                url: Mutex::new(None),
                sender: Mutex::new(None),
                reconnect_cancel: Mutex::new(None),
                num_retry: AtomicU32::new(config.retries),
                re_tries: AtomicU32::new(config.retries),
                sent_audio_frames: AtomicU64::new(0),
                sent_video_frames: AtomicU64::new(0),
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts publishing to `url` in the background.
    ///
    /// Connect and publish run on the sender thread; their outcome arrives
    /// through `on_connection_success` or `on_connection_failed` /
    /// `on_auth_error`.
    pub fn start(&self, url: &str) -> Result<()> {
        *lock(&self.inner.url) = Some(url.to_string());
        Inner::spawn_sender(&self.inner, url.to_string())
    }

    /// Stops publishing, drops queued frames, and reports `on_disconnect`.
    ///
    /// Cancels a pending reconnect. Also zeroes the retry budget, which
    /// [`set_re_tries`](Self::set_re_tries) re-arms.
    pub fn stop(&self) {
        self.inner.shutdown();
        self.inner.re_tries.store(0, Ordering::Release);
        info!("RTMP publisher stopped");
        self.inner.checker.on_disconnect();
    }

    /// Stops the current session and starts again after `delay`, using one
    /// unit of the retry budget.
    ///
    /// Safe to call from a [`ConnectChecker`] callback. A later `stop()` or
    /// `reconnect()` cancels the pending restart.
    pub fn reconnect(&self, delay: Duration) -> Result<()> {
        let inner = &self.inner;
        let url = lock(&inner.url)
            .clone()
            .ok_or(ConnectionError::NotConnected)?;
        let _ = inner
            .re_tries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        inner.shutdown();

        let (cancel, cancelled) = bounded::<()>(1);
        *lock(&inner.reconnect_cancel) = Some(cancel);
        let timer_inner = Arc::clone(inner);
        thread::Builder::new()
            .name("rtmp-reconnect".to_string())
            .spawn(move || match cancelled.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => {
                    if lock(&timer_inner.reconnect_cancel).take().is_none() {
                        return;
                    }
                    info!("Reconnecting to {url}");
                    if let Err(e) = Inner::spawn_sender(&timer_inner, url) {
                        error!("Reconnect failed: {e}");
                    }
                }
                _ => debug!("Reconnect cancelled"),
            })
            .map_err(|e| {
                error!("Thread[rtmp-reconnect] exited with error: {e}");
                Error::ThreadExited
            })?;
        info!("Reconnecting in {}ms", delay.as_millis());
        Ok(())
    }

    /// Whether a failure with `reason` should be followed by `reconnect`.
    ///
    /// A malformed endpoint never becomes valid; anything else is retried
    /// while the retry budget lasts.
    pub fn should_retry(&self, reason: &str) -> bool {
        !reason.contains("Endpoint malformed") && self.inner.re_tries.load(Ordering::Acquire) > 0
    }

    /// Sets the retry budget granted after each successful publish.
    pub fn set_re_tries(&self, re_tries: u32) {
        self.inner.num_retry.store(re_tries, Ordering::Release);
        self.inner.re_tries.store(re_tries, Ordering::Release);
    }

    /// Retries left before `should_retry` answers `false`.
    pub fn re_tries(&self) -> u32 {
        self.inner.re_tries.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.status.load(Ordering::Acquire) == STATUS_RUN
            && self.inner.connection.state() == ConnectionState::Publishing
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    // ========================================================================
    // Media
    // ========================================================================

    /// Muxes one H.264 Annex-B access unit.
    pub fn send_video(&self, data: &[u8], info: &SampleInfo) -> Result<()> {
        self.inner.muxer.write_video_sample(data, info)
    }

    /// Muxes one AAC sample.
    pub fn send_audio(&self, data: &[u8], info: &SampleInfo) -> Result<()> {
        self.inner.muxer.write_audio_sample(data, info)
    }

    /// Provides SPS/PPS out of band, with or without start codes.
    pub fn set_sps_pps(&self, sps: &[u8], pps: &[u8]) {
        self.inner.muxer.set_sps_pps(sps, pps);
    }

    pub fn set_video_resolution(&self, width: u32, height: u32) {
        self.inner.connection.set_video_resolution(width, height);
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.inner.muxer.set_sample_rate(sample_rate);
    }

    pub fn set_is_stereo(&self, stereo: bool) {
        self.inner.muxer.set_is_stereo(stereo);
    }

    pub fn set_profile_iop(&self, profile_iop: u8) {
        self.inner.muxer.set_profile_iop(profile_iop);
    }

    /// Credentials used from the next connect on.
    pub fn set_authorization(&self, user: impl Into<String>, password: impl Into<String>) {
        self.inner.connection.set_authorization(user, password);
    }

    // ========================================================================
    // Queues and counters
    // ========================================================================

    /// Resizes both frame queues.
    ///
    /// # Errors
    /// Fails without changing anything if `capacity` is zero or either queue
    /// holds more frames than `capacity`.
    pub fn resize_frame_queue_capacity(&self, capacity: usize) -> Result<()> {
        self.inner.muxer.resize_queues(capacity)?;
        Ok(())
    }

    pub fn frame_queue_capacity(&self) -> usize {
        self.inner.muxer.queue_capacity()
    }

    /// Frames muxed but not sent yet, audio and video together.
    pub fn pending_frames(&self) -> usize {
        self.inner.muxer.pending_frames()
    }

    pub fn sent_audio_frames(&self) -> u64 {
        self.inner.sent_audio_frames.load(Ordering::Relaxed)
    }

    pub fn sent_video_frames(&self) -> u64 {
        self.inner.sent_video_frames.load(Ordering::Relaxed)
    }

    pub fn dropped_audio_frames(&self) -> u64 {
        self.inner.muxer.audio_queue().dropped_frames()
    }

    pub fn dropped_video_frames(&self) -> u64 {
        self.inner.muxer.video_queue().dropped_frames()
    }

    pub fn reset_sent_audio_frames(&self) {
        self.inner.sent_audio_frames.store(0, Ordering::Relaxed);
    }

    pub fn reset_sent_video_frames(&self) {
        self.inner.sent_video_frames.store(0, Ordering::Relaxed);
    }

    pub fn reset_dropped_audio_frames(&self) {
        self.inner.muxer.audio_queue().reset_dropped_frames();
    }

    pub fn reset_dropped_video_frames(&self) {
        self.inner.muxer.video_queue().reset_dropped_frames();
    }
}

impl Drop for RtmpPublisher {
    fn drop(&mut self) {
        if self.inner.status.load(Ordering::Acquire) != STATUS_INIT {
            self.inner.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::rtmp_header::MessageType;
    use crate::rtmp::test_server::{init_logger, listener, serve, Recorder, ServerConn};
    use std::time::Instant;

    const SPS: [u8; 8] = [0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16];
    const PPS: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    fn annexb(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_builder_requires_checker() {
        let result = RtmpPublisher::builder().build();
        assert!(matches!(
            result,
            Err(Error::Build(BuildError::MissingParameter("connect_checker")))
        ));
        let result = RtmpPublisher::builder()
            .connect_checker(Arc::new(Recorder::default()))
            .frame_queue_capacity(0)
            .build();
        assert!(matches!(result, Err(Error::Queue(QueueError::ZeroCapacity))));
    }

    #[test]
    fn test_publish_media_end_to_end() {
        init_logger();
        let (listener, url) = listener();
        let server = thread::spawn(move || serve(ServerConn::accept(&listener), "NetStream.Publish.Start"));

        let recorder = Arc::new(Recorder::default());
        let publisher = RtmpPublisher::builder()
            .connect_checker(recorder.clone())
            .video_resolution(640, 360)
            .retries(2)
            .build()
            .unwrap();
        publisher.start(&url).unwrap();
        assert!(recorder.wait_for_successes(1, Duration::from_secs(5)));
        assert!(publisher.is_streaming());
        assert_eq!(publisher.re_tries(), 2);

        publisher
            .send_video(&annexb(&[&SPS, &PPS]), &SampleInfo::new(0).codec_config())
            .unwrap();
        publisher
            .send_video(&annexb(&[&[0x65, 0x88, 0x84]]), &SampleInfo::new(40_000).key_frame())
            .unwrap();
        publisher.send_audio(&[0x21; 10], &SampleInfo::new(0)).unwrap();
        publisher.send_audio(&[0x21; 20], &SampleInfo::new(23_000)).unwrap();

        assert!(wait_until(Duration::from_secs(3), || {
            publisher.sent_video_frames() == 2 && publisher.sent_audio_frames() == 2
        }));
        assert_eq!(publisher.pending_frames(), 0);

        publisher.stop();
        assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
        assert!(!publisher.is_streaming());
        assert_eq!(publisher.re_tries(), 0);

        let seen = server.join().expect("server panicked");
        let videos: Vec<_> = seen
            .iter()
            .filter(|m| m.type_id == MessageType::Video as u8)
            .collect();
        assert_eq!(videos.len(), 2);
        assert_eq!(&videos[0].data[..2], &[0x17, 0x00]);
        assert_eq!(&videos[1].data[..2], &[0x17, 0x01]);
        let audios: Vec<_> = seen
            .iter()
            .filter(|m| m.type_id == MessageType::Audio as u8)
            .collect();
        assert_eq!(audios.len(), 2);
        assert_eq!(audios[1].data.len(), 22);
        assert_eq!(seen.last().and_then(|m| m.command_name()), Some("closeStream"));
        assert!(recorder.failures().is_empty(), "{:?}", recorder.failures());

        // Counters survive stop until reset explicitly.
        assert_eq!(publisher.sent_video_frames(), 2);
        publisher.reset_sent_video_frames();
        publisher.reset_sent_audio_frames();
        assert_eq!(publisher.sent_video_frames(), 0);
        assert_eq!(publisher.sent_audio_frames(), 0);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        init_logger();
        let (listener, url) = listener();
        let server = thread::spawn(move || serve(ServerConn::accept(&listener), "NetStream.Publish.Start"));

        let recorder = Arc::new(Recorder::default());
        let publisher = RtmpPublisher::new(recorder.clone());
        publisher.start(&url).unwrap();
        assert!(recorder.wait_for_successes(1, Duration::from_secs(5)));
        assert!(matches!(
            publisher.start(&url),
            Err(Error::Connection(ConnectionError::AlreadyConnected))
        ));
        publisher.stop();
        server.join().expect("server panicked");
    }

    #[test]
    fn test_reconnect_after_server_loss() {
        init_logger();
        let (listener, url) = listener();
        let server = thread::spawn(move || {
            // First session: accept the publish, then drop the socket.
            let mut first = ServerConn::accept(&listener);
            let mut published = false;
            while let Some(message) = first.next_message() {
                if message.command_name() == Some("connect") {
                    first.send_command(0, crate::rtmp::test_server::connect_success(1));
                }
                if message.command_name() == Some("createStream") {
                    let txn = message.command.as_ref().map_or(0.0, |c| c.1) as u32;
                    first.send_command(
                        0,
                        crate::rtmp::rtmp_packet::Command::new("_result", txn)
                            .with_arg(crate::rtmp::amf0::AmfValue::Null)
                            .with_arg(1.0),
                    );
                }
                if message.command_name() == Some("publish") {
                    first.send_command(
                        1,
                        crate::rtmp::rtmp_packet::Command::new("onStatus", 0)
                            .with_arg(crate::rtmp::amf0::AmfValue::Null)
                            .with_arg(crate::rtmp::test_server::status(
                                "NetStream.Publish.Start",
                                "started",
                            )),
                    );
                    published = true;
                    break;
                }
            }
            assert!(published);
            thread::sleep(Duration::from_millis(100));
            drop(first);

            serve(ServerConn::accept(&listener), "NetStream.Publish.Start")
        });

        let recorder = Arc::new(Recorder::default());
        let publisher = RtmpPublisher::new(recorder.clone());
        publisher.set_re_tries(1);
        publisher.start(&url).unwrap();
        assert!(recorder.wait_for_successes(1, Duration::from_secs(5)));

        let reason = recorder
            .wait_for_failure(Duration::from_secs(5))
            .expect("loss reported");
        assert!(publisher.should_retry(&reason));

        // The sender winds down with the connection; later samples wait in
        // the queue instead of disappearing.
        assert!(wait_until(Duration::from_secs(2), || {
            lock(&publisher.inner.sender)
                .as_ref()
                .map_or(true, |h| h.is_finished())
        }));
        assert!(!publisher.is_streaming());
        for i in 0..5 {
            publisher.send_audio(&[0x21; 8], &SampleInfo::new(i * 23_000)).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(publisher.pending_frames(), 5);
        assert_eq!(publisher.sent_audio_frames(), 0);
        assert_eq!(publisher.dropped_audio_frames(), 0);

        publisher.reconnect(Duration::from_millis(50)).unwrap();
        assert_eq!(publisher.re_tries(), 0);

        assert!(recorder.wait_for_successes(2, Duration::from_secs(5)));
        // Budget restored after the successful publish.
        assert_eq!(publisher.re_tries(), 1);
        publisher.stop();
        server.join().expect("server panicked");
    }

    #[test]
    fn test_stop_cancels_pending_reconnect() {
        init_logger();
        let (listener, url) = listener();
        let recorder = Arc::new(Recorder::default());
        let publisher = RtmpPublisher::new(recorder.clone());
        publisher.set_re_tries(3);
        *lock(&publisher.inner.url) = Some(url);

        publisher.reconnect(Duration::from_millis(200)).unwrap();
        publisher.stop();
        listener.set_nonblocking(true).unwrap();
        thread::sleep(Duration::from_millis(400));
        assert!(listener.accept().is_err(), "reconnect was not cancelled");
        assert_eq!(recorder.successes.load(Ordering::SeqCst), 0);
        assert!(recorder.failures().is_empty(), "{:?}", recorder.failures());
    }

    #[test]
    fn test_should_retry_rules() {
        let publisher = RtmpPublisher::new(Arc::new(Recorder::default()));
        assert!(!publisher.should_retry("Error reading packet: reset"));
        publisher.set_re_tries(2);
        assert!(publisher.should_retry("Error reading packet: reset"));
        assert!(!publisher.should_retry(
            "Endpoint malformed, should be: rtmp://ip:port/appname/streamname (x)"
        ));
    }

    #[test]
    fn test_reconnect_without_url_fails() {
        let publisher = RtmpPublisher::new(Arc::new(Recorder::default()));
        assert!(matches!(
            publisher.reconnect(Duration::from_millis(1)),
            Err(Error::Connection(ConnectionError::NotConnected))
        ));
    }

    #[test]
    fn test_queue_capacity_and_drop_counters() {
        let publisher = RtmpPublisher::builder()
            .connect_checker(Arc::new(Recorder::default()))
            .frame_queue_capacity(2)
            .build()
            .unwrap();
        assert_eq!(publisher.frame_queue_capacity(), 2);

        // Not started: frames stay queued, the third one is dropped.
        for i in 0..3 {
            publisher.send_audio(&[1; 8], &SampleInfo::new(i * 1000)).unwrap();
        }
        assert_eq!(publisher.pending_frames(), 2);
        assert_eq!(publisher.dropped_audio_frames(), 1);
        assert!(matches!(
            publisher.resize_frame_queue_capacity(1),
            Err(Error::Queue(QueueError::BacklogExceedsCapacity { .. }))
        ));
        publisher.resize_frame_queue_capacity(10).unwrap();
        assert_eq!(publisher.frame_queue_capacity(), 10);

        publisher.reset_dropped_audio_frames();
        assert_eq!(publisher.dropped_audio_frames(), 0);
        assert_eq!(publisher.dropped_video_frames(), 0);
    }

    #[test]
    fn test_failed_start_reports_through_checker() {
        init_logger();
        let recorder = Arc::new(Recorder::default());
        let publisher = RtmpPublisher::new(recorder.clone());
        publisher.start("rtmp://127.0.0.1").unwrap();
        let reason = recorder
            .wait_for_failure(Duration::from_secs(3))
            .expect("failure reported");
        assert!(reason.starts_with("Endpoint malformed"), "{reason}");
        assert!(!publisher.should_retry(&reason));
        assert_eq!(recorder.successes.load(Ordering::SeqCst), 0);
    }
}
