use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, warn};

use crate::models::{genre_name, MovieRecord};
use crate::tmdb::CatalogApi;

/// Movie ids held in a membership set. Document ids that are not integers
/// are skipped; the result is sorted so lookups resolve in a stable order.
pub fn parse_ids(ids: &HashSet<String>) -> Vec<i32> {
    let mut parsed: Vec<i32> = ids.iter().filter_map(|id| id.parse().ok()).collect();
    parsed.sort_unstable();
    parsed
}

/// Look up every id concurrently and keep the ones that resolved, in input
/// order. A failed lookup only drops its own entry.
pub async fn materialize(catalog: &dyn CatalogApi, ids: &[i32]) -> Vec<MovieRecord> {
    let lookups = ids
        .iter()
        .map(|&id| async move { (id, catalog.fetch_movie(id).await) });
    let settled = join_all(lookups).await;

    let mut movies = Vec::with_capacity(settled.len());
    for (id, result) in settled {
        match result {
            Ok(movie) => movies.push(movie),
            Err(e) => warn!(movie_id = id, "detail lookup failed, dropping entry: {:#}", e),
        }
    }
    debug!(requested = ids.len(), resolved = movies.len(), "materialized movies");
    movies
}

/// Known genre names across the given movies, looked up concurrently.
pub async fn collect_genres(catalog: &dyn CatalogApi, ids: &[i32]) -> BTreeSet<String> {
    materialize(catalog, ids)
        .await
        .iter()
        .flat_map(|m| m.genre_ids.iter().filter_map(|id| genre_name(*id)))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogPage;
    use crate::tmdb::DiscoverParams;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    struct DetailOnly;

    #[async_trait]
    impl CatalogApi for DetailOnly {
        async fn discover(&self, _params: &DiscoverParams) -> Result<CatalogPage> {
            anyhow::bail!("not used")
        }
        async fn search(&self, _query: &str, _page: u32) -> Result<CatalogPage> {
            anyhow::bail!("not used")
        }
        async fn fetch_movie(&self, id: i32) -> Result<MovieRecord> {
            // Later ids answer first so input order is what keeps the result stable.
            tokio::time::sleep(Duration::from_millis(30 - (id as u64) * 5)).await;
            if id == 2 {
                anyhow::bail!("404 for movie 2");
            }
            Ok(MovieRecord {
                id,
                title: format!("Movie {id}"),
                release_date: "2000-01-01".to_string(),
                poster_path: String::new(),
                genre_ids: if id == 1 { vec![28, 99] } else { vec![18, 28] },
                rating: 7.0,
            })
        }
    }

    #[tokio::test]
    async fn failed_lookup_is_dropped_from_batch() {
        let movies = materialize(&DetailOnly, &[1, 2, 3]).await;
        let ids: Vec<i32> = movies.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn empty_batch_resolves_immediately() {
        assert!(materialize(&DetailOnly, &[]).await.is_empty());
    }

    #[tokio::test]
    async fn genres_are_unioned_and_unknown_ids_skipped() {
        let genres = collect_genres(&DetailOnly, &[1, 2, 3]).await;
        assert_eq!(
            genres.into_iter().collect::<Vec<_>>(),
            vec!["Action".to_string(), "Drama".to_string()]
        );
    }

    #[test]
    fn non_numeric_document_ids_are_skipped() {
        let ids: HashSet<String> = ["42", "abc", "7", ""].iter().map(|s| s.to_string()).collect();
        assert_eq!(parse_ids(&ids), vec![7, 42]);
    }
}
