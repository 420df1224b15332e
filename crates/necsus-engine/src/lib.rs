//! Event dispatch and bot orchestration for NeCSuS rooms.
//!
//! The [`Dispatcher`] is the single entry point for anything that changes a room:
//! it stores the inbound message, decides which bots to call (the conversation pin
//! first, the trigger router otherwise), calls them through the [`BotClient`], and
//! publishes every resulting message to live viewers through the broker.

pub mod bot_client;
pub mod dispatcher;
pub mod error;
pub mod resolver;
pub mod router;
pub mod sequencer;

#[cfg(test)]
mod test_support;

pub use bot_client::{BotClient, BotTarget, Envelope, SanitizedReply};
pub use dispatcher::{Dispatcher, EngineConfig, SYSTEM_AUTHOR};
pub use error::{BotError, DispatchError, RouteError};
pub use resolver::RoomConversationPointer;
pub use router::{RouteOutcome, TriggerRouter};
