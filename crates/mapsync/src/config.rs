use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub bind: SocketAddr,
    /// Period of the liveness probe sent to every subscriber.
    pub ping_interval: Duration,
    /// Cap for one inbound frame or reassembled message.
    pub max_frame_len: usize,
    /// Per-subscriber outbound queue depth. A full queue drops the subscriber.
    pub outbound_queue: usize,
    /// How long a poll-only player keeps its zone colours without a subscriber.
    pub poll_session_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 4200)),
            ping_interval: Duration::from_secs(30),
            max_frame_len: mapio::ws::DEFAULT_MAX_FRAME_LEN,
            outbound_queue: 128,
            poll_session_ttl: Duration::from_secs(10 * 60),
        }
    }
}
