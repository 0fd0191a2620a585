use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::fanout::{FanOut, StreamEvent};

/// Publishes a `ping` on a fixed interval so idle streams stay open
/// through proxies.
pub struct Heartbeat {
    fanout: Arc<FanOut>,
    interval_secs: u64,
}

impl Heartbeat {
    pub fn new(fanout: Arc<FanOut>, interval_secs: u64) -> Self {
        Self { fanout, interval_secs: interval_secs.max(1) }
    }

    pub async fn run(self) {
        let period = Duration::from_secs(self.interval_secs);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let delivered = self.fanout.publish(StreamEvent::Ping);
            trace!(delivered, "heartbeat");
        }
    }
}
