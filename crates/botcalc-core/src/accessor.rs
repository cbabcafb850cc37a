//! Per-bot read/write handle over a [`PrecalculationManager`].

use crate::bot::{Bot, BotUpdate, StateUpdate};
use crate::error::PrecalcError;
use crate::precalc::PrecalculationManager;
use crate::value::Value;

/// Reads computed values and writes raw tags of one bot. Every write runs
/// a full incremental batch.
#[derive(Debug)]
pub struct BotAccessor<'m> {
    manager: &'m mut PrecalculationManager,
    id: String,
}

impl<'m> BotAccessor<'m> {
    pub(crate) fn new(manager: &'m mut PrecalculationManager, id: &str) -> Self {
        Self {
            manager,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Computed value of `tag`.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&Value> {
        self.manager.bot(&self.id).and_then(|bot| bot.value(tag))
    }

    /// Raw value of `tag` as last written.
    #[must_use]
    pub fn raw(&self, tag: &str) -> Option<&Value> {
        self.manager.raw_state().get(&self.id).and_then(|bot| bot.tags.get(tag))
    }

    #[must_use]
    pub fn tag_names(&self) -> Vec<String> {
        self.manager.tags_on_bot(&self.id)
    }

    /// Write one raw tag. An empty value clears it.
    ///
    /// # Errors
    ///
    /// [`PrecalcError::UnknownBot`] if the bot was removed meanwhile.
    pub fn set(&mut self, tag: &str, value: impl Into<Value>) -> Result<StateUpdate, PrecalcError> {
        let mut bot = Bot::new(self.id.as_str()).with_tag(tag, value);
        bot.space = self.manager.raw_state().get(&self.id).and_then(|raw| raw.space.clone());
        self.manager.bots_updated(vec![BotUpdate::new(bot, [tag])])
    }

    /// Clear one raw tag.
    ///
    /// # Errors
    ///
    /// See [`Self::set`].
    pub fn delete(&mut self, tag: &str) -> Result<StateUpdate, PrecalcError> {
        self.set(tag, Value::Null)
    }
}
