use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use necsus_db::Store;
use necsus_gateway::Broker;
use necsus_types::models::{Attachments, Bot, Message, NewBot, NewMessage};

use crate::bot_client::{self, BotClient, BotTarget, Envelope};
use crate::error::DispatchError;
use crate::resolver;
use crate::router::{RouteOutcome, TriggerRouter};
use crate::sequencer::RoomSequencer;

/// Author of messages the relay writes itself.
pub const SYSTEM_AUTHOR: &str = "NeCSuS";

/// Trigger given to bots registered from a form reply. It can never match, so such
/// bots are only reached through the conversation pin.
const UNREACHABLE_TRIGGER: &str = r"\z.";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a whole bot call.
    pub bot_timeout: Duration,
    /// Upper bound on evaluating one trigger pattern.
    pub pattern_timeout: Duration,
    /// Let bot replies move themselves to another room.
    pub allow_room_override: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_timeout: Duration::from_secs(120),
            pattern_timeout: Duration::from_millis(250),
            allow_room_override: false,
        }
    }
}

/// Runs every action that changes a room. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<dyn Store>,
    broker: Broker,
    bots: BotClient,
    router: TriggerRouter,
    rooms: RoomSequencer,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, broker: Broker, config: EngineConfig) -> anyhow::Result<Self> {
        let bots = BotClient::new(config.bot_timeout, config.allow_room_override)?;

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                store,
                broker,
                bots,
                router: TriggerRouter::new(config.pattern_timeout),
                rooms: RoomSequencer::new(),
            }),
        })
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn broker(&self) -> &Broker {
        &self.inner.broker
    }

    /// Store a message and hand it to live viewers. Nothing is awaited in between.
    fn record(&self, message: &NewMessage) -> Result<Message, DispatchError> {
        let stored = self.inner.store.add_message(message)?;
        self.inner.broker.publish_message(&stored.room, stored.clone());
        Ok(stored)
    }

    fn report_failure(&self, room: &str, bot_name: &str, error: &dyn std::fmt::Display) -> Result<Message, DispatchError> {
        let text = format!("Something went wrong. Bot '{bot_name}' {error}");
        self.record(&NewMessage::system(room, SYSTEM_AUTHOR, text))
    }

    /// Post a human message, then let the pinned bot or every matching bot reply.
    ///
    /// Bot failures end up in the room as system messages; only storage errors
    /// reach the caller. Returns the stored human message.
    #[instrument(name = "Dispatcher::post_message", skip(self, text, attachments))]
    pub async fn post_message(
        &self,
        room: &str,
        author: &str,
        text: &str,
        attachments: Attachments,
    ) -> Result<Message, DispatchError> {
        let _turn = self.inner.rooms.lock(room).await;

        let pin = resolver::resolve(self.inner.store.as_ref(), room)?;

        let message = self.record(&NewMessage {
            image: attachments.image,
            media: attachments.media,
            css: attachments.css,
            js: attachments.js,
            base_url: attachments.base_url,
            ..NewMessage::user(room, author, text)
        })?;

        if let Some(pin) = pin {
            match self.inner.store.find_bot(pin.bot_id)? {
                Some(bot) => {
                    debug!("Room is pinned to bot {:?}", bot.name);
                    let envelope = Envelope::Message {
                        room: room.to_string(),
                        author: author.to_string(),
                        text: text.to_string(),
                        params: Map::new(),
                        state: Some(pin.state),
                    };
                    self.run_bot(room, &BotTarget::from(&bot), &envelope).await?;
                }
                None => warn!("Room is pinned to bot {} which no longer exists", pin.bot_id),
            }

            return Ok(message);
        }

        let bots = self.inner.store.bots_in_room(room)?;
        for outcome in self.inner.router.route(bots, text).await {
            match outcome {
                RouteOutcome::Matched { bot, params } => {
                    let envelope = Envelope::Message {
                        room: room.to_string(),
                        author: author.to_string(),
                        text: text.to_string(),
                        params,
                        state: None,
                    };
                    self.run_bot(room, &BotTarget::from(&bot), &envelope).await?;
                }
                RouteOutcome::Failed { bot, error } => {
                    self.report_failure(room, &bot.name, &error)?;
                }
            }
        }

        Ok(message)
    }

    /// Call one bot and record whatever comes of it: its reply, or a system message.
    async fn run_bot(&self, room: &str, target: &BotTarget, envelope: &Envelope) -> Result<Option<Message>, DispatchError> {
        match self.inner.bots.invoke(room, target, envelope).await {
            Ok(reply) => Ok(Some(self.record(&reply.into_message())?)),
            Err(e) => {
                warn!("Bot {:?} failed: {}", target.name, e);
                self.report_failure(room, &target.name, &e)?;
                Ok(None)
            }
        }
    }

    /// Send a submitted form back to the bot that rendered it.
    ///
    /// `action_url` is resolved against the bot's URL. When it lands on a URL no bot
    /// in the room owns and the reply opens a conversation, that URL is registered as
    /// a bot of its own so the conversation can continue there.
    #[instrument(name = "Dispatcher::post_form_callback", skip(self, action_url, form_data))]
    pub async fn post_form_callback(
        &self,
        room: &str,
        author: &str,
        bot_id: i64,
        action_url: Option<&str>,
        form_data: Value,
    ) -> Result<(), DispatchError> {
        let _turn = self.inner.rooms.lock(room).await;

        let store = self.inner.store.as_ref();
        let bot = store.find_bot(bot_id)?.ok_or(DispatchError::BotNotFound(bot_id))?;

        let url = match (bot.url.as_deref(), action_url) {
            (Some(base), Some(action)) => {
                bot_client::resolve_url(base, action).unwrap_or_else(|| action.to_string())
            }
            (None, Some(action)) => action.to_string(),
            (base, None) => base.unwrap_or_default().to_string(),
        };

        let target = match store.find_bot_by_url(room, &url)? {
            Some(owner) => BotTarget::from(&owner),
            None => BotTarget {
                id: None,
                name: bot.name.clone(),
                url: Some(url),
            },
        };

        let state = resolver::resolve(store, room)?.map(|pin| pin.state);
        let envelope = Envelope::Form {
            room: room.to_string(),
            author: author.to_string(),
            form_data,
            state,
        };

        let mut reply = match self.inner.bots.invoke(room, &target, &envelope).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Form callback to {:?} failed: {}", target.url, e);
                self.report_failure(room, &target.name, &e)?;
                return Ok(());
            }
        };

        if reply.state.is_some() && target.id.is_none() {
            let registered = store.put_bot(&NewBot {
                id: None,
                room: room.to_string(),
                name: target.name.clone(),
                responds_to: Some(UNREACHABLE_TRIGGER.to_string()),
                url: target.url.clone(),
            })?;
            info!("Registered bot {} for form action {:?}", registered.id, registered.url);

            reply.from_bot = Some(registered.id);
            let room = registered.room.clone();
            self.inner.broker.put_bot(&room, registered);
        }

        self.record(&reply.into_message())?;
        Ok(())
    }

    /// Release the room's conversation pin, if it has one, with a visible system message.
    pub async fn clear_room_state(&self, room: &str) -> Result<(), DispatchError> {
        let _turn = self.inner.rooms.lock(room).await;

        if resolver::resolve(self.inner.store.as_ref(), room)?.is_some() {
            self.record(&NewMessage::system(room, SYSTEM_AUTHOR, "The room state has been cleared"))?;
        }

        Ok(())
    }

    /// Delete a room's history and tell viewers to drop theirs.
    ///
    /// The newest id becomes the room's clear marker, so viewers reconnecting with
    /// an older cursor also clear first.
    pub async fn clear_room_messages(&self, room: &str) -> Result<String, DispatchError> {
        let _turn = self.inner.rooms.lock(room).await;
        let store = self.inner.store.as_ref();

        if let Some(last) = store.last_message(room)? {
            store.set_last_cleared_id(room, last.id)?;
            store.delete_messages(room)?;
            self.inner.broker.clear_room(room);
            info!("Cleared room {:?} up to message {}", room, last.id);
        }

        Ok(room.to_string())
    }

    /// Create a bot, or update the one with `bot.id`.
    pub async fn put_bot(&self, bot: NewBot) -> Result<Bot, DispatchError> {
        let _turn = self.inner.rooms.lock(&bot.room).await;
        let store = self.inner.store.as_ref();

        let previous = match bot.id {
            Some(id) => store.find_bot(id)?,
            None => None,
        };

        let saved = store.put_bot(&bot)?;

        if let Some(previous) = previous.filter(|previous| previous.room != saved.room) {
            let room = previous.room.clone();
            self.inner.broker.delete_bot(&room, previous);
        }
        self.inner.broker.put_bot(&saved.room, saved.clone());

        Ok(saved)
    }

    pub async fn delete_bot(&self, id: i64) -> Result<Bot, DispatchError> {
        let store = self.inner.store.as_ref();
        let bot = store.find_bot(id)?.ok_or(DispatchError::BotNotFound(id))?;

        let _turn = self.inner.rooms.lock(&bot.room).await;
        if store.remove_bot(id)? {
            self.inner.broker.delete_bot(&bot.room, bot.clone());
        }

        Ok(bot)
    }
}
