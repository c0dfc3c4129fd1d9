//! Fan-out of pipeline events to dashboard subscribers.

pub mod events;
pub mod hub;

pub use events::{
    ChannelType, ClientMessage, Envelope, HubEvent, Subscription, SubscriptionFilters, TimeRange,
};
pub use hub::{BroadcastHub, ConnectionStats};
