//! Favorites and watchlist as fully resident movie lists.
//!
//! A [`Library`] follows one membership category: every pushed snapshot is
//! materialized into detail records, replacing the previous list wholesale.
//! Each list is tagged with the session it was built for and is only served
//! while that session is still the current one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::filter::{apply_local_filter, paginate, FilterCriteria, LocalPage};
use crate::materialize::{materialize, parse_ids};
use crate::membership::{Category, MembershipTracker, SessionEpoch};
use crate::models::MovieRecord;
use crate::tmdb::CatalogApi;

pub type MovieList = Arc<Vec<MovieRecord>>;

/// A materialized list and the session whose membership it reflects.
#[derive(Debug, Clone, Default)]
pub struct Resident {
    pub session: u64,
    pub movies: MovieList,
}

#[derive(Debug)]
pub struct Library {
    category: Category,
    resident: watch::Receiver<Resident>,
    epoch: SessionEpoch,
    loading: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Library {
    pub fn spawn(
        category: Category,
        tracker: &MembershipTracker,
        catalog: Arc<dyn CatalogApi>,
    ) -> Self {
        let mut members = tracker.subscribe_changes(category);
        let (tx, resident) = watch::channel(Resident::default());
        let loading = Arc::new(AtomicBool::new(false));
        let flag = loading.clone();

        let task = tokio::spawn(async move {
            loop {
                let (session, ids) = {
                    let snapshot = members.borrow_and_update();
                    (snapshot.session, parse_ids(&snapshot.ids))
                };
                flag.store(true, Ordering::SeqCst);
                let resolved = materialize(catalog.as_ref(), &ids).await;
                info!(
                    category = category.collection(),
                    session,
                    count = resolved.len(),
                    "library refreshed"
                );
                tx.send_replace(Resident {
                    session,
                    movies: Arc::new(resolved),
                });
                flag.store(false, Ordering::SeqCst);
                if members.changed().await.is_err() {
                    break;
                }
            }
        });

        Self {
            category,
            resident,
            epoch: tracker.session_epoch(),
            loading,
            task,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    fn is_current(&self, resident: &Resident) -> bool {
        resident.session == self.epoch.current()
    }

    /// The resident list, or an empty one while the list still belongs to
    /// an earlier session.
    pub fn movies(&self) -> MovieList {
        let resident = self.resident.borrow();
        if self.is_current(&resident) {
            resident.movies.clone()
        } else {
            MovieList::default()
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) || !self.is_current(&self.resident.borrow())
    }

    /// Receiver that observes every list replacement.
    pub fn watch(&self) -> watch::Receiver<Resident> {
        self.resident.clone()
    }

    /// Filter the resident list and slice out `page`.
    pub fn page(&self, criteria: &FilterCriteria, page: usize, page_size: usize) -> LocalPage {
        let movies = self.movies();
        paginate(apply_local_filter(&movies, criteria), page, page_size)
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        self.task.abort();
    }
}
