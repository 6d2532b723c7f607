//! Filter criteria, their translation into catalog requests, and the
//! in-memory filter used for lists that are already fully resident
//! (favorites, watchlist).

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::models::{genre_id, MovieRecord};
use crate::tmdb::{CatalogRequest, DiscoverParams};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Default,
    ByRating,
    ByReleaseDate,
}

impl SortMode {
    /// Server-side ordering requested from the catalog.
    pub fn sort_by(self) -> Option<&'static str> {
        match self {
            SortMode::Default => None,
            SortMode::ByRating => Some("vote_average.desc"),
            SortMode::ByReleaseDate => Some("primary_release_date.desc"),
        }
    }
}

/// User-supplied search, filter and sort selection.
///
/// Numeric bounds are kept as the raw text the user typed. Anything that
/// does not parse is treated as "no constraint" wherever it is read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub text_query: Option<String>,
    pub genres: BTreeSet<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub year_from: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub year_to: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub rating_min: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub rating_max: Option<String>,
    pub sort_mode: SortMode,
}

impl FilterCriteria {
    /// The search text, when it is non-blank.
    pub fn search_text(&self) -> Option<&str> {
        self.text_query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn year_from(&self) -> Option<i32> {
        parse_year(self.year_from.as_deref())
    }

    pub fn year_to(&self) -> Option<i32> {
        parse_year(self.year_to.as_deref())
    }

    pub fn rating_min(&self) -> Option<f64> {
        parse_rating(self.rating_min.as_deref())
    }

    pub fn rating_max(&self) -> Option<f64> {
        parse_rating(self.rating_max.as_deref())
    }

    /// Comma-joined catalog ids for the selected tags. Unknown tags are dropped.
    pub fn genre_param(&self) -> Option<String> {
        let ids: Vec<String> = self
            .genres
            .iter()
            .filter_map(|tag| genre_id(tag))
            .map(|id| id.to_string())
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(ids.join(","))
        }
    }

    /// Translate into the remote request for `page`. No range validation is
    /// done here; an inverted year range is sent as-is.
    pub fn to_request(&self, page: u32) -> CatalogRequest {
        if let Some(query) = self.search_text() {
            return CatalogRequest::Search {
                query: query.to_string(),
                page,
            };
        }
        CatalogRequest::Discover(DiscoverParams {
            with_genres: self.genre_param(),
            release_date_gte: self.year_from().map(|y| format!("{y}-01-01")),
            release_date_lte: self.year_to().map(|y| format!("{y}-12-31")),
            vote_average_gte: self.rating_min(),
            vote_average_lte: self.rating_max(),
            sort_by: self.sort_mode.sort_by(),
            page,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.search_text().is_none()
            && self.genres.is_empty()
            && self.year_from().is_none()
            && self.year_to().is_none()
            && self.rating_min().is_none()
            && self.rating_max().is_none()
    }
}

pub fn parse_year(raw: Option<&str>) -> Option<i32> {
    raw.and_then(|s| s.trim().parse().ok())
}

pub fn parse_rating(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|r| r.is_finite())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    // Bounds arrive either as typed text or as JSON numbers.
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn release_sort_key(movie: &MovieRecord) -> NaiveDate {
    // NaiveDate::default() is 1970-01-01.
    NaiveDate::parse_from_str(&movie.release_date, "%Y-%m-%d").unwrap_or_default()
}

/// Client-side ordering applied to every fetched page. This runs after any
/// server-side ordering and its result is the one that is kept.
pub fn sort_results(movies: &mut [MovieRecord], mode: SortMode) {
    match mode {
        SortMode::Default => {}
        SortMode::ByRating => movies.sort_by(|a, b| b.rating.total_cmp(&a.rating)),
        SortMode::ByReleaseDate => movies.sort_by_key(|m| std::cmp::Reverse(release_sort_key(m))),
    }
}

/// Filter an in-memory list. Every predicate must pass; a predicate whose
/// bound (or the record's own value) cannot be parsed lets the record through.
pub fn apply_local_filter(movies: &[MovieRecord], criteria: &FilterCriteria) -> Vec<MovieRecord> {
    let needle = criteria
        .text_query
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let year_from = criteria.year_from();
    let year_to = criteria.year_to();
    let rating_min = criteria.rating_min();
    let rating_max = criteria.rating_max();

    movies
        .iter()
        .filter(|m| m.title.to_lowercase().contains(&needle))
        .filter(|m| {
            criteria.genres.is_empty()
                || m.genre_names()
                    .iter()
                    .any(|name| criteria.genres.contains(*name))
        })
        .filter(|m| match (year_from, m.release_year()) {
            (Some(from), Some(year)) => year >= from,
            _ => true,
        })
        .filter(|m| match (year_to, m.release_year()) {
            (Some(to), Some(year)) => year <= to,
            _ => true,
        })
        .filter(|m| rating_min.map_or(true, |min| m.rating >= min))
        .filter(|m| rating_max.map_or(true, |max| m.rating <= max))
        .cloned()
        .collect()
}

/// One page sliced out of a locally filtered list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalPage {
    pub movies: Vec<MovieRecord>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: usize,
}

impl LocalPage {
    pub fn next_page(&self) -> Option<usize> {
        (self.current_page < self.total_pages).then_some(self.current_page + 1)
    }

    pub fn prev_page(&self) -> Option<usize> {
        (self.current_page > 1).then_some(self.current_page - 1)
    }
}

/// Slice `requested` out of `filtered`. The page is clamped down to the last
/// page and never below 1.
pub fn paginate(filtered: Vec<MovieRecord>, requested: usize, page_size: usize) -> LocalPage {
    let page_size = page_size.max(1);
    let total_items = filtered.len();
    let total_pages = total_items.div_ceil(page_size);
    let current_page = requested.max(1).min(total_pages.max(1));
    let movies = filtered
        .into_iter()
        .skip((current_page - 1) * page_size)
        .take(page_size)
        .collect();
    LocalPage {
        movies,
        current_page,
        total_pages,
        total_items,
        page_size,
    }
}
