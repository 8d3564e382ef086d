//! Messages the client sends to the server.

use crate::UserId;
use serde::{Deserialize, Serialize};

/// Update feeds a socket subscription can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Quotations,
    Orders,
    Messages,
    Notifications,
}

impl Channel {
    /// Every channel, in handshake order.
    pub const ALL: [Channel; 4] = [
        Channel::Quotations,
        Channel::Orders,
        Channel::Messages,
        Channel::Notifications,
    ];
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Socket handshake naming the feeds of interest.
    Subscribe {
        user_id: UserId,
        channels: Vec<Channel>,
    },
    /// Keep-alive, socket only.
    Heartbeat { timestamp: u64 },
    /// A user action reported back to the server.
    UserAction {
        user_id: UserId,
        action: String,
        data: serde_json::Value,
        timestamp: u64,
    },
}

impl ClientMessage {
    pub fn subscribe(user_id: UserId) -> Self {
        Self::Subscribe {
            user_id,
            channels: Channel::ALL.to_vec(),
        }
    }
}
