// src/rtmp/connect_checker.rs - Connection event callbacks

/// Receives connection lifecycle events.
///
/// Callbacks run on the connection's worker threads; implementations must
/// return quickly and must not call `stop()` synchronously from inside a
/// callback (use `reconnect` or hand the work to another thread).
pub trait ConnectChecker: Send + Sync {
    fn on_connection_success(&self);

    fn on_connection_failed(&self, reason: &str);

    /// Measured outgoing media bitrate in bits per second.
    fn on_new_bitrate(&self, bitrate: u64);

    fn on_disconnect(&self);

    fn on_auth_error(&self);

    fn on_auth_success(&self);
}
