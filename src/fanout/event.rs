use serde_json::json;

use crate::types::Deal;

/// Events pushed to live observers. The wire name is the SSE `event:` field,
/// the payload its `data:` JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Sent once per connection, right after it opens.
    Connected,
    /// Heartbeat.
    Ping,
    DealUpserted(Deal),
    DealDeleted { id: i64 },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected => "connected",
            StreamEvent::Ping => "ping",
            StreamEvent::DealUpserted(_) => "deal_upserted",
            StreamEvent::DealDeleted { .. } => "deal_deleted",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            StreamEvent::Connected => json!({ "ok": true }),
            StreamEvent::Ping => json!({}),
            StreamEvent::DealUpserted(deal) => serde_json::to_value(deal).unwrap_or_else(|_| json!({ "id": deal.id })),
            StreamEvent::DealDeleted { id } => json!({ "id": id }),
        }
    }
}
