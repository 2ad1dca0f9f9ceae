mod auth;
mod collaborations;
mod db;
mod events;
mod media;
mod mixing;
mod storage;
mod themes;
mod util;

use std::sync::Arc;

pub use auth::*;
pub use collaborations::*;
pub use db::*;
pub use events::*;
pub use media::*;
pub use mixing::*;
pub use storage::*;
pub use themes::*;

/// The Jamin collab system: members, their themes and layers, and the
/// derived collaborations built from them.
pub struct Collab<Db, St> {
    pub auth: Auth<Db>,
    pub themes: ThemeManager<Db, St>,
    pub collaborations: CollabManager<Db, St>,
    pub mixer: MixPipeline<St>,

    events: EventReceiver,
}

/// A type passed to various components of the collab system, to access shared
/// state and emit events.
pub struct CollabContext<Db, St> {
    pub database: Arc<Db>,
    pub storage: Arc<St>,

    pub(crate) events: EventSender,
}

impl<Db, St> Collab<Db, St>
where
    Db: Database,
    St: Storage,
{
    pub fn new(database: Db, storage: St, mixer_config: MixerConfig) -> Self {
        let database = Arc::new(database);
        let storage = Arc::new(storage);
        let (sender, receiver) = events::channel();

        let context = CollabContext {
            database: database.clone(),
            storage: storage.clone(),
            events: sender,
        };

        Self {
            auth: Auth::new(&database),
            themes: ThemeManager::new(&context),
            collaborations: CollabManager::new(&context),
            mixer: MixPipeline::new(&storage, mixer_config),
            events: receiver,
        }
    }

    /// Returns a receiver for collab events. Receivers can be cloned and
    /// drained independently, consumers are expected to keep draining.
    pub fn events(&self) -> EventReceiver {
        self.events.clone()
    }
}

impl<Db, St> CollabContext<Db, St>
where
    Db: Database,
    St: Storage,
{
    pub(crate) fn emit(&self, event: CollabEvent) {
        // Dropped silently when every receiver is gone
        let _ = self.events.send(event);
    }
}

impl<Db, St> Clone for CollabContext<Db, St>
where
    Db: Database,
    St: Storage,
{
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            storage: self.storage.clone(),
            events: self.events.clone(),
        }
    }
}
