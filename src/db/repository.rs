use std::cell::Cell;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result, ValidationError};
use crate::models::{Post, User};
use crate::notify::{Notifier, Subscription, Topic};

use super::backend::{KvBackend, MemoryBackend, SqliteBackend};
use super::seed;

pub const SESSION_KEY: &str = "currentUser";
pub const CREDENTIALS_KEY: &str = "credentials";
const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Users,
    Posts,
}

impl Collection {
    pub fn key(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Posts => "posts",
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            Collection::Users => Topic::UsersChanged,
            Collection::Posts => Topic::PostsChanged,
        }
    }

    /// Posts are kept most-recent-first; users in registration order.
    fn prepends(&self) -> bool {
        matches!(self, Collection::Posts)
    }
}

/// A record type stored as one serialized collection.
pub trait Record: Serialize + DeserializeOwned + Clone {
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    /// Uniqueness rule beyond the id, checked on create only.
    fn conflict(&self, _existing: &Self) -> Option<ValidationError> {
        None
    }

    fn defaults() -> Result<Vec<Self>>;
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn conflict(&self, existing: &Self) -> Option<ValidationError> {
        existing
            .has_email(&self.email)
            .then(|| ValidationError::EmailTaken(self.email.trim().to_string()))
    }

    fn defaults() -> Result<Vec<Self>> {
        seed::default_users()
    }
}

impl Record for Post {
    const COLLECTION: Collection = Collection::Posts;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn defaults() -> Result<Vec<Self>> {
        seed::default_posts()
    }
}

fn unavailable(action: &str, err: AppError) -> AppError {
    AppError::StorageUnavailable(format!("{}: {}", action, err))
}

/// CRUD over the `users` and `posts` collections. Every mutation is a full
/// read-modify-write of one collection followed by a change notification.
pub struct Repository {
    backend: Box<dyn KvBackend>,
    notifier: Notifier,
    seed_defaults: bool,
    /// `None` until the revision could be read once.
    seen_revision: Cell<Option<u64>>,
}

impl Repository {
    pub fn new(backend: Box<dyn KvBackend>, seed_defaults: bool) -> Self {
        let seen_revision = backend
            .external_revision()
            .map_err(|e| tracing::warn!("{}: external change tracking starts at first poll", e))
            .ok();
        Self {
            backend,
            notifier: Notifier::new(),
            seed_defaults,
            seen_revision: Cell::new(seen_revision),
        }
    }

    /// Opens the SQLite store at `db_path`. `:memory:` gives a store that
    /// lives only as long as the process.
    pub fn open(config: &Config) -> Result<Self> {
        let backend: Box<dyn KvBackend> = if config.db_path == MEMORY_PATH {
            Box::new(MemoryBackend::new())
        } else {
            Box::new(SqliteBackend::open(&config.db_path)?)
        };
        tracing::debug!("opened store at {}", config.db_path);
        Ok(Self::new(backend, config.seed_defaults))
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn subscribe(&self, topic: Topic, handler: impl Fn(Topic) + 'static) -> Subscription {
        self.notifier.subscribe(topic, handler)
    }

    // Collection operations

    /// The whole collection in storage order. An absent collection is
    /// seeded (when enabled) and persisted before it is returned.
    pub fn list<T: Record>(&self) -> Result<Vec<T>> {
        let key = T::COLLECTION.key();
        let stored = self
            .backend
            .get(key)
            .map_err(|e| unavailable("read failed", e))?;

        match stored {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                AppError::StorageUnavailable(format!("corrupt {} collection: {}", key, e))
            }),
            None => {
                let records = if self.seed_defaults {
                    T::defaults()?
                } else {
                    Vec::new()
                };
                tracing::info!("seeding {} with {} default record(s)", key, records.len());
                self.save(&records)?;
                Ok(records)
            }
        }
    }

    /// Like [`Repository::list`], but an unreadable store is an empty one.
    pub fn list_or_empty<T: Record>(&self) -> Vec<T> {
        self.list().unwrap_or_else(|e| {
            tracing::warn!("{}: treating {} as empty", e, T::COLLECTION.key());
            Vec::new()
        })
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        Ok(self.list::<T>()?.into_iter().find(|r| r.id() == id))
    }

    /// Stores a new record and returns its id. An empty id is replaced with
    /// a fresh UUID.
    pub fn create<T: Record>(&self, mut record: T) -> Result<String> {
        let mut records = self.list::<T>()?;

        if record.id().is_empty() {
            record.set_id(Uuid::new_v4().to_string());
        } else if records.iter().any(|r| r.id() == record.id()) {
            return Err(ValidationError::DuplicateId(record.id().to_string()).into());
        }
        if let Some(err) = records.iter().find_map(|existing| record.conflict(existing)) {
            return Err(err.into());
        }

        let id = record.id().to_string();
        if T::COLLECTION.prepends() {
            records.insert(0, record);
        } else {
            records.push(record);
        }
        self.save(&records)?;
        tracing::debug!("created {} record {}", T::COLLECTION.key(), id);

        self.notifier.publish(T::COLLECTION.topic());
        Ok(id)
    }

    /// Replaces the record with `id`. Returns `false` when there is none.
    pub fn update<T: Record>(&self, id: &str, record: T) -> Result<bool> {
        self.modify(id, move |current: &mut T| *current = record)
    }

    /// Read-modify-write of one record. The id cannot be changed through
    /// this path. Returns `false` when there is no record with `id`.
    pub fn modify<T: Record>(&self, id: &str, f: impl FnOnce(&mut T)) -> Result<bool> {
        let mut records = self.list::<T>()?;
        let Some(record) = records.iter_mut().find(|r| r.id() == id) else {
            tracing::debug!("{} record {} not found for update", T::COLLECTION.key(), id);
            return Ok(false);
        };

        f(record);
        record.set_id(id.to_string());
        self.save(&records)?;
        tracing::debug!("updated {} record {}", T::COLLECTION.key(), id);

        self.notifier.publish(T::COLLECTION.topic());
        Ok(true)
    }

    pub fn delete<T: Record>(&self, id: &str) -> Result<bool> {
        let mut records = self.list::<T>()?;
        let Some(index) = records.iter().position(|r| r.id() == id) else {
            return Ok(false);
        };

        records.remove(index);
        self.save(&records)?;
        tracing::info!("deleted {} record {}", T::COLLECTION.key(), id);

        self.notifier.publish(T::COLLECTION.topic());
        Ok(true)
    }

    fn save<T: Record>(&self, records: &[T]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.backend
            .put(T::COLLECTION.key(), &raw)
            .map_err(|e| unavailable("write failed", e))
    }

    // Cross-handle change detection

    /// Publishes [`Topic::StorageChanged`] when another handle has written
    /// to the backing storage since the last poll.
    pub fn poll_external_changes(&self) -> Result<bool> {
        let revision = self
            .backend
            .external_revision()
            .map_err(|e| unavailable("revision check failed", e))?;
        let Some(seen) = self.seen_revision.replace(Some(revision)) else {
            tracing::debug!("external change tracking starts at revision {}", revision);
            return Ok(false);
        };
        if revision == seen {
            return Ok(false);
        }

        tracing::info!("storage changed outside this process");
        self.notifier.publish(Topic::StorageChanged);
        Ok(true)
    }

    // Single-value slots (session marker, credentials)

    pub fn read_slot<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let stored = self
            .backend
            .get(key)
            .map_err(|e| unavailable("read failed", e))?;
        match stored {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn write_slot<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend
            .put(key, &raw)
            .map_err(|e| unavailable("write failed", e))
    }

    pub fn clear_slot(&self, key: &str) -> Result<()> {
        self.backend
            .remove(key)
            .map_err(|e| unavailable("remove failed", e))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{PostDraft, Role};

    pub(crate) fn memory_repo() -> Repository {
        Repository::new(Box::new(MemoryBackend::new()), true)
    }

    pub(crate) fn new_post(title: &str, author_id: &str) -> Post {
        PostDraft {
            title: title.to_string(),
            content: format!("Body of *{}*", title),
            category: "Culture".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        }
        .into_post(author_id, Utc::now(), 150)
    }

    pub(crate) fn new_user(email: &str, role: Role) -> User {
        User {
            id: String::new(),
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            role,
            avatar: None,
            bio: None,
            joined_at: Utc::now(),
            is_active: true,
        }
    }

    struct BrokenBackend;

    impl KvBackend for BrokenBackend {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::Config("storage disabled".to_string()))
        }

        fn put(&self, _key: &str, _value: &str) -> Result<()> {
            Err(AppError::Config("storage disabled".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(AppError::Config("storage disabled".to_string()))
        }

        fn external_revision(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn created_post_round_trips_field_for_field() {
        let repo = memory_repo();
        let mut post = new_post("Round trip", "3");
        post.id = "fixed-id".to_string();
        post.featured_image = Some("https://img.example/r.png".to_string());

        let id = repo.create(post.clone()).unwrap();
        assert_eq!(id, "fixed-id");

        let stored: Vec<Post> = repo.list().unwrap();
        assert_eq!(stored.iter().find(|p| p.id == id), Some(&post));
    }

    #[test]
    fn posts_prepend_and_users_append() {
        let repo = memory_repo();
        let post_id = repo.create(new_post("Newest", "1")).unwrap();
        let user_id = repo.create(new_user("new@example.com", Role::Author)).unwrap();

        let posts: Vec<Post> = repo.list().unwrap();
        let users: Vec<User> = repo.list().unwrap();
        assert_eq!(posts.first().map(|p| p.id.as_str()), Some(post_id.as_str()));
        assert_eq!(users.last().map(|u| u.id.as_str()), Some(user_id.as_str()));
    }

    #[test]
    fn empty_ids_get_unique_generated_ids() {
        let repo = memory_repo();
        let first = repo.create(new_post("One", "1")).unwrap();
        let second = repo.create(new_post("Two", "1")).unwrap();
        assert_ne!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn duplicate_ids_and_emails_are_rejected() {
        let repo = memory_repo();
        let mut post = new_post("Clash", "1");
        post.id = "1".to_string();
        assert!(matches!(
            repo.create(post),
            Err(AppError::Validation(ValidationError::DuplicateId(_)))
        ));

        let user = new_user("ADMIN@folio.local", Role::Reader);
        assert!(matches!(
            repo.create(user),
            Err(AppError::Validation(ValidationError::EmailTaken(_)))
        ));
    }

    #[test]
    fn update_of_missing_id_changes_nothing() {
        let repo = memory_repo();
        let before: Vec<Post> = repo.list().unwrap();

        let found = repo.update("no-such-post", new_post("Ghost", "1")).unwrap();
        assert!(!found);
        let after: Vec<Post> = repo.list().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn update_replaces_in_place_and_keeps_id() {
        let repo = memory_repo();
        let mut replacement = new_post("Replaced", "2");
        replacement.id = "something-else".to_string();

        assert!(repo.update("2", replacement).unwrap());
        let posts: Vec<Post> = repo.list().unwrap();
        assert_eq!(posts[1].id, "2");
        assert_eq!(posts[1].title, "Replaced");
    }

    #[test]
    fn delete_is_permanent() {
        let repo = memory_repo();
        assert!(repo.delete::<Post>("3").unwrap());
        assert!(repo.get::<Post>("3").unwrap().is_none());
        assert!(!repo.delete::<Post>("3").unwrap());
    }

    #[test]
    fn seeding_happens_once() {
        let repo = memory_repo();
        let first: Vec<User> = repo.list().unwrap();
        let second: Vec<User> = repo.list().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, seed::default_users().unwrap());
    }

    #[test]
    fn seeding_can_be_disabled() {
        let repo = Repository::new(Box::new(MemoryBackend::new()), false);
        let posts: Vec<Post> = repo.list().unwrap();
        assert!(posts.is_empty());
    }

    #[test]
    fn one_create_notifies_each_subscriber_once_in_order() {
        let repo = memory_repo();
        let log = Rc::new(RefCell::new(Vec::new()));

        let first_log = Rc::clone(&log);
        let _first = repo.subscribe(Topic::PostsChanged, move |_| first_log.borrow_mut().push(1));
        let second_log = Rc::clone(&log);
        let _second = repo.subscribe(Topic::PostsChanged, move |_| second_log.borrow_mut().push(2));

        repo.create(new_post("Announce", "1")).unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn user_deletion_notifies() {
        let repo = memory_repo();
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        let _sub = repo.subscribe(Topic::UsersChanged, move |_| *counter.borrow_mut() += 1);

        assert!(repo.delete::<User>("4").unwrap());
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn not_found_mutations_do_not_notify() {
        let repo = memory_repo();
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        let _sub = repo.subscribe(Topic::PostsChanged, move |_| *counter.borrow_mut() += 1);

        assert!(!repo.delete::<Post>("missing").unwrap());
        assert!(!repo.modify::<Post>("missing", |p| p.view_count += 1).unwrap());
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn unavailable_storage_is_reported_and_degrades_to_empty() {
        let repo = Repository::new(Box::new(BrokenBackend), true);
        assert!(matches!(
            repo.list::<Post>(),
            Err(AppError::StorageUnavailable(_))
        ));
        assert!(repo.list_or_empty::<Post>().is_empty());
        assert!(matches!(
            repo.create(new_post("x", "1")),
            Err(AppError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn corrupt_collection_is_unavailable() {
        let backend = MemoryBackend::new();
        backend.put("posts", "{not json").unwrap();
        let repo = Repository::new(Box::new(backend), true);
        assert!(matches!(
            repo.list::<Post>(),
            Err(AppError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn writes_from_another_handle_raise_storage_changed() {
        let backend = MemoryBackend::new();
        let other = Repository::new(Box::new(backend.handle()), true);
        let repo = Repository::new(Box::new(backend), true);

        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        let _sub = repo.subscribe(Topic::StorageChanged, move |_| *counter.borrow_mut() += 1);

        assert!(!repo.poll_external_changes().unwrap());
        repo.create(new_post("Mine", "1")).unwrap();
        assert!(!repo.poll_external_changes().unwrap());

        other.create(new_post("Theirs", "2")).unwrap();
        assert!(repo.poll_external_changes().unwrap());
        assert!(!repo.poll_external_changes().unwrap());
        assert_eq!(*hits.borrow(), 1);

        let posts: Vec<Post> = repo.list().unwrap();
        assert_eq!(posts[0].title, "Theirs");
    }

    struct LateRevisionBackend {
        inner: MemoryBackend,
        revision_reads: Cell<u32>,
    }

    impl KvBackend for LateRevisionBackend {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn put(&self, key: &str, value: &str) -> Result<()> {
            self.inner.put(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }

        fn external_revision(&self) -> Result<u64> {
            self.revision_reads.set(self.revision_reads.get() + 1);
            if self.revision_reads.get() == 1 {
                return Err(AppError::Config("revision unavailable".to_string()));
            }
            Ok(self.inner.external_revision()? + 7)
        }
    }

    #[test]
    fn unreadable_initial_revision_does_not_fake_a_change() {
        let backend = LateRevisionBackend {
            inner: MemoryBackend::new(),
            revision_reads: Cell::new(0),
        };
        let repo = Repository::new(Box::new(backend), true);
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        let _sub = repo.subscribe(Topic::StorageChanged, move |_| *counter.borrow_mut() += 1);

        assert!(!repo.poll_external_changes().unwrap());
        assert!(!repo.poll_external_changes().unwrap());
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            db_path: dir.path().join("folio.db").to_string_lossy().to_string(),
            ..Config::for_tests()
        };

        let id = {
            let repo = Repository::open(&config).unwrap();
            repo.create(new_post("Durable", "1")).unwrap()
        };

        let repo = Repository::open(&config).unwrap();
        let post: Option<Post> = repo.get(&id).unwrap();
        assert_eq!(post.map(|p| p.title), Some("Durable".to_string()));
    }

    #[test]
    fn memory_path_opens_an_ephemeral_store() {
        let repo = Repository::open(&Config::for_tests()).unwrap();
        let posts: Vec<Post> = repo.list().unwrap();
        assert_eq!(posts.len(), seed::default_posts().unwrap().len());
    }

    #[test]
    fn slots_round_trip() {
        let repo = memory_repo();
        assert_eq!(repo.read_slot::<User>(SESSION_KEY).unwrap(), None);

        let user = new_user("slot@example.com", Role::Reader);
        repo.write_slot(SESSION_KEY, &user).unwrap();
        assert_eq!(repo.read_slot::<User>(SESSION_KEY).unwrap(), Some(user));

        repo.clear_slot(SESSION_KEY).unwrap();
        assert_eq!(repo.read_slot::<User>(SESSION_KEY).unwrap(), None);
    }
}
