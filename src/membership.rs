//! Favorite / watchlist membership for the active user.
//!
//! The remote store keeps one document collection per category per user;
//! a document's presence means membership. [`MembershipTracker`] mirrors the
//! two collections as immutable snapshots that are swapped wholesale on every
//! push, so readers never lock and never wait on I/O.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Favorites,
    Watchlist,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Favorites, Category::Watchlist];

    /// Name of the per-user document collection.
    pub fn collection(self) -> &'static str {
        match self {
            Category::Favorites => "favorites",
            Category::Watchlist => "watchlist",
        }
    }
}

pub type MembershipSet = Arc<HashSet<String>>;

/// A published membership set, tagged with the session it was read under.
#[derive(Debug, Clone, Default)]
pub struct MemberSnapshot {
    pub session: u64,
    pub ids: MembershipSet,
}

impl std::ops::Deref for MemberSnapshot {
    type Target = HashSet<String>;

    fn deref(&self) -> &HashSet<String> {
        &self.ids
    }
}

/// Read handle on the tracker's session counter.
#[derive(Debug, Clone)]
pub struct SessionEpoch(Arc<AtomicU64>);

impl SessionEpoch {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live stream of full snapshots (document ids) of one collection.
pub type Snapshots = BoxStream<'static, Result<Vec<String>>>;

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// The first item is the current content; every later item replaces it.
    async fn subscribe(&self, user: &str, category: Category) -> Result<Snapshots>;
    async fn put(&self, user: &str, category: Category, movie_id: &str) -> Result<()>;
    async fn delete(&self, user: &str, category: Category, movie_id: &str) -> Result<()>;
}

type CollectionKey = (String, Category);

/// In-process document store. Each collection is a `watch` channel so
/// subscribers receive the whole collection after every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: std::sync::Mutex<HashMap<CollectionKey, Arc<watch::Sender<BTreeSet<String>>>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`delete` fail (outage simulation).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn documents(&self, user: &str, category: Category) -> Vec<String> {
        self.collection(user, category).borrow().iter().cloned().collect()
    }

    fn collection(&self, user: &str, category: Category) -> Arc<watch::Sender<BTreeSet<String>>> {
        let mut guard = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .entry((user.to_string(), category))
            .or_insert_with(|| Arc::new(watch::channel(BTreeSet::new()).0))
            .clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("membership store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn subscribe(&self, user: &str, category: Category) -> Result<Snapshots> {
        let rx = self.collection(user, category).subscribe();
        let stream = futures::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let ids: Vec<String> = rx.borrow_and_update().iter().cloned().collect();
            Some((Ok(ids), (rx, false)))
        });
        Ok(stream.boxed())
    }

    async fn put(&self, user: &str, category: Category, movie_id: &str) -> Result<()> {
        self.check_writable()?;
        self.collection(user, category).send_modify(|docs| {
            docs.insert(movie_id.to_string());
        });
        Ok(())
    }

    async fn delete(&self, user: &str, category: Category, movie_id: &str) -> Result<()> {
        self.check_writable()?;
        self.collection(user, category).send_modify(|docs| {
            docs.remove(movie_id);
        });
        Ok(())
    }
}

/// A single set-or-delete write against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub user: String,
    pub category: Category,
    pub movie_id: String,
    pub member: bool,
}

/// Fire-and-forget write queue drained by one background task. Writes are
/// best effort: a failed write is logged and dropped.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl WriteQueue {
    pub fn spawn(store: Arc<dyn MembershipStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteCommand>();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let result = if cmd.member {
                    store.put(&cmd.user, cmd.category, &cmd.movie_id).await
                } else {
                    store.delete(&cmd.user, cmd.category, &cmd.movie_id).await
                };
                match result {
                    Ok(()) => debug!(
                        movie_id = %cmd.movie_id,
                        category = cmd.category.collection(),
                        member = cmd.member,
                        "membership write applied"
                    ),
                    Err(e) => warn!(
                        movie_id = %cmd.movie_id,
                        category = cmd.category.collection(),
                        "membership write failed: {:#}",
                        e
                    ),
                }
            }
        });
        Self { tx }
    }

    pub fn enqueue(&self, cmd: WriteCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("membership write queue closed, dropping write");
        }
    }
}

struct Session {
    user: String,
    tasks: Vec<JoinHandle<()>>,
}

pub struct MembershipTracker {
    store: Arc<dyn MembershipStore>,
    writes: WriteQueue,
    favorites: Arc<watch::Sender<MemberSnapshot>>,
    watchlist: Arc<watch::Sender<MemberSnapshot>>,
    /// Bumped on every session change; snapshot tasks of older sessions
    /// can no longer publish.
    epoch: Arc<AtomicU64>,
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for MembershipTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipTracker")
            .field("favorites", &self.favorites.borrow().len())
            .field("watchlist", &self.watchlist.borrow().len())
            .finish()
    }
}

impl MembershipTracker {
    /// Must be called inside a tokio runtime (spawns the write queue).
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        let writes = WriteQueue::spawn(store.clone());
        Self {
            store,
            writes,
            favorites: Arc::new(watch::channel(MemberSnapshot::default()).0),
            watchlist: Arc::new(watch::channel(MemberSnapshot::default()).0),
            epoch: Arc::new(AtomicU64::new(0)),
            session: Mutex::new(None),
        }
    }

    fn sender(&self, category: Category) -> &Arc<watch::Sender<MemberSnapshot>> {
        match category {
            Category::Favorites => &self.favorites,
            Category::Watchlist => &self.watchlist,
        }
    }

    /// Tear down any previous session and subscribe both categories for `user`.
    pub async fn start_session(&self, user: &str) -> Result<()> {
        let mut session = self.session.lock().await;
        self.teardown(&mut session);
        let epoch = self.epoch.load(Ordering::SeqCst);

        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let snapshots = match self.store.subscribe(user, category).await {
                Ok(s) => s,
                Err(e) => {
                    for task in &tasks {
                        task.abort();
                    }
                    return Err(e).with_context(|| {
                        format!("subscribing to {} of {}", category.collection(), user)
                    });
                }
            };
            tasks.push(self.spawn_listener(category, snapshots, epoch));
        }

        info!(user = %user, "membership session started");
        *session = Some(Session {
            user: user.to_string(),
            tasks,
        });
        Ok(())
    }

    fn spawn_listener(&self, category: Category, mut snapshots: Snapshots, epoch: u64) -> JoinHandle<()> {
        let tx = self.sender(category).clone();
        let current = self.epoch.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                let ids = match snapshot {
                    Ok(ids) => ids,
                    Err(e) => {
                        warn!(
                            category = category.collection(),
                            "membership snapshot error, keeping previous set: {:#}",
                            e
                        );
                        continue;
                    }
                };
                let count = ids.len();
                let snapshot = MemberSnapshot {
                    session: epoch,
                    ids: Arc::new(ids.into_iter().collect()),
                };
                let published = tx.send_if_modified(|cur| {
                    if current.load(Ordering::SeqCst) != epoch {
                        return false;
                    }
                    *cur = snapshot;
                    true
                });
                if !published {
                    break;
                }
                debug!(category = category.collection(), count, "membership snapshot applied");
            }
        })
    }

    /// Stop both subscriptions and reset the sets to empty.
    pub async fn end_session(&self) {
        let mut session = self.session.lock().await;
        if let Some(user) = session.as_ref().map(|s| s.user.clone()) {
            info!(user = %user, "membership session ended");
        }
        self.teardown(&mut session);
    }

    fn teardown(&self, session: &mut Option<Session>) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = session.take() {
            for task in old.tasks {
                task.abort();
            }
        }
        for category in Category::ALL {
            self.sender(category).send_replace(MemberSnapshot {
                session: epoch,
                ids: MembershipSet::default(),
            });
        }
    }

    pub async fn current_user(&self) -> Option<String> {
        self.session.lock().await.as_ref().map(|s| s.user.clone())
    }

    /// Queue a membership write for the active user. Returns `false` (and
    /// does nothing) when no session is active. The write is not awaited.
    pub async fn toggle(&self, category: Category, movie_id: &str, member: bool) -> bool {
        let Some(user) = self.current_user().await else {
            debug!(movie_id, "toggle ignored without an active session");
            return false;
        };
        self.writes.enqueue(WriteCommand {
            user,
            category,
            movie_id: movie_id.to_string(),
            member,
        });
        true
    }

    /// Membership check against the latest snapshot.
    pub fn is_member(&self, category: Category, movie_id: &str) -> bool {
        self.sender(category).borrow().contains(movie_id)
    }

    pub fn snapshot(&self, category: Category) -> MembershipSet {
        self.sender(category).borrow().ids.clone()
    }

    pub fn subscribe_changes(&self, category: Category) -> watch::Receiver<MemberSnapshot> {
        self.sender(category).subscribe()
    }

    /// Bumped every time a session starts or ends.
    pub fn session_epoch(&self) -> SessionEpoch {
        SessionEpoch(self.epoch.clone())
    }
}

impl Drop for MembershipTracker {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            for task in session.tasks {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn wait_for_set(tracker: &MembershipTracker, category: Category, expected: &[&str]) {
        let mut rx = tracker.subscribe_changes(category);
        let expected: HashSet<String> = expected.iter().map(|s| s.to_string()).collect();
        timeout(Duration::from_secs(2), rx.wait_for(|set| **set == expected))
            .await
            .expect("timed out waiting for snapshot")
            .expect("sender alive");
    }

    #[tokio::test]
    async fn session_start_populates_from_existing_documents() {
        let store = Arc::new(MemoryStore::new());
        store.put("alice", Category::Favorites, "603").await.unwrap();
        store.put("alice", Category::Watchlist, "27205").await.unwrap();
        store.put("bob", Category::Favorites, "11").await.unwrap();

        let tracker = MembershipTracker::new(store.clone());
        tracker.start_session("alice").await.unwrap();

        wait_for_set(&tracker, Category::Favorites, &["603"]).await;
        wait_for_set(&tracker, Category::Watchlist, &["27205"]).await;
        assert!(tracker.is_member(Category::Favorites, "603"));
        assert!(!tracker.is_member(Category::Favorites, "11"));
    }

    #[tokio::test]
    async fn toggle_writes_through_and_snapshot_follows() {
        let store = Arc::new(MemoryStore::new());
        let tracker = MembershipTracker::new(store.clone());
        tracker.start_session("alice").await.unwrap();

        assert!(tracker.toggle(Category::Watchlist, "42", true).await);
        wait_for_set(&tracker, Category::Watchlist, &["42"]).await;
        assert_eq!(store.documents("alice", Category::Watchlist), vec!["42"]);

        assert!(tracker.toggle(Category::Watchlist, "42", false).await);
        wait_for_set(&tracker, Category::Watchlist, &[]).await;
        assert!(!tracker.is_member(Category::Watchlist, "42"));
    }

    #[tokio::test]
    async fn toggle_without_session_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        let tracker = MembershipTracker::new(store.clone());
        assert!(!tracker.toggle(Category::Favorites, "1", true).await);
        tokio::task::yield_now().await;
        assert!(store.documents("", Category::Favorites).is_empty());
    }

    #[tokio::test]
    async fn failed_write_leaves_set_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let tracker = MembershipTracker::new(store.clone());
        tracker.start_session("alice").await.unwrap();
        store.set_fail_writes(true);

        tracker.toggle(Category::Favorites, "5", true).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!tracker.is_member(Category::Favorites, "5"));
        assert!(store.documents("alice", Category::Favorites).is_empty());
    }

    #[tokio::test]
    async fn ending_session_clears_sets_and_ignores_later_pushes() {
        let store = Arc::new(MemoryStore::new());
        store.put("alice", Category::Favorites, "1").await.unwrap();
        let tracker = MembershipTracker::new(store.clone());
        tracker.start_session("alice").await.unwrap();
        wait_for_set(&tracker, Category::Favorites, &["1"]).await;

        tracker.end_session().await;
        assert!(tracker.snapshot(Category::Favorites).is_empty());
        assert_eq!(tracker.current_user().await, None);

        store.put("alice", Category::Favorites, "2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tracker.snapshot(Category::Favorites).is_empty());
    }

    #[tokio::test]
    async fn switching_user_resubscribes_against_new_owner() {
        let store = Arc::new(MemoryStore::new());
        store.put("alice", Category::Favorites, "1").await.unwrap();
        store.put("bob", Category::Favorites, "2").await.unwrap();
        let tracker = MembershipTracker::new(store.clone());

        tracker.start_session("alice").await.unwrap();
        wait_for_set(&tracker, Category::Favorites, &["1"]).await;
        tracker.start_session("bob").await.unwrap();
        wait_for_set(&tracker, Category::Favorites, &["2"]).await;
        assert_eq!(tracker.current_user().await.as_deref(), Some("bob"));
        let epoch = tracker.session_epoch().current();
        assert_eq!(tracker.subscribe_changes(Category::Favorites).borrow().session, epoch);

        store.put("alice", Category::Favorites, "3").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!tracker.is_member(Category::Favorites, "3"));
    }
}
