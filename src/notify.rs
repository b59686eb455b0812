//! In-process change signals.
//!
//! Delivery is synchronous and carries no payload: a subscriber learns that
//! a topic changed and re-reads the store itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PostsChanged,
    UsersChanged,
    /// Another handle on the same backing storage wrote to it.
    StorageChanged,
    SessionChanged,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::PostsChanged => "postsChanged",
            Topic::UsersChanged => "usersChanged",
            Topic::StorageChanged => "storageChanged",
            Topic::SessionChanged => "sessionChanged",
        };
        f.write_str(name)
    }
}

type Handler = Rc<dyn Fn(Topic)>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(u64, Topic, Handler)>,
}

#[derive(Clone, Default)]
pub struct Notifier {
    registry: Rc<RefCell<Registry>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`. The handler stays registered until
    /// the returned guard is dropped.
    pub fn subscribe(&self, topic: Topic, handler: impl Fn(Topic) + 'static) -> Subscription {
        let mut registry = self.registry.borrow_mut();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push((id, topic, Rc::new(handler)));
        tracing::debug!("subscribed #{} to {}", id, topic);

        Subscription {
            id,
            registry: Rc::downgrade(&self.registry),
        }
    }

    /// Calls every handler of `topic` once, in subscription order. Handlers
    /// registered or dropped during delivery take effect on the next publish.
    pub fn publish(&self, topic: Topic) {
        let handlers: Vec<Handler> = self
            .registry
            .borrow()
            .entries
            .iter()
            .filter(|(_, t, _)| *t == topic)
            .map(|(_, _, handler)| Rc::clone(handler))
            .collect();

        tracing::debug!("publishing {} to {} subscriber(s)", topic, handlers.len());
        for handler in handlers {
            handler(topic);
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .borrow()
            .entries
            .iter()
            .filter(|(_, t, _)| *t == topic)
            .count()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.registry.borrow().entries.len())
            .finish()
    }
}

/// Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<RefCell<Registry>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .borrow_mut()
                .entries
                .retain(|(id, _, _)| *id != self.id);
            tracing::debug!("unsubscribed #{}", self.id);
        }
    }
}
