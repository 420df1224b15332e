pub mod broker;
pub mod connection;

pub use broker::{Broker, RoomSnapshot, Subscription, SubscriptionToken};
