//! Downstream Fanout
//!
//! The [`BroadcastHub`] keeps subscribers and the latest snapshot; the
//! [`FanoutServer`] binds it to local WebSocket connections.

mod hub;
mod server;

pub use hub::{
    BroadcastHub, FanoutMessage, HubStats, PublishReport, Subscriber, SubscriberId,
    SubscriberSendError,
};
pub use server::{FanoutServer, FanoutServerError};
