use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::PrimaryKey;

pub type EventSender = Sender<CollabEvent>;
pub type EventReceiver = Receiver<CollabEvent>;

/// Events emitted by the collab system. Consumers use these to invalidate
/// cached collaboration views and to drive push surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollabEvent {
    /// A new original theme was created
    ThemeCreated { theme_id: PrimaryKey },
    /// A layer was added to the collaboration rooted at `theme_id`
    LayerCreated {
        theme_id: PrimaryKey,
        layer_id: PrimaryKey,
    },
    /// A theme was deleted
    ThemeDeleted { theme_id: PrimaryKey },
}

pub(crate) fn channel() -> (EventSender, EventReceiver) {
    unbounded()
}
