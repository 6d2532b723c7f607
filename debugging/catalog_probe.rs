//! Translate filter flags into a catalog request, run it, and print the page.
//! Usage:
//!   cargo run --bin catalog_probe -- discover [--genres Action,Drama] [--from 1990] [--to 1999]
//!                                         [--min 7] [--max 9] [--sort rating|date] [--page N]
//!   cargo run --bin catalog_probe -- search <text> [--page N]
//!   cargo run --bin catalog_probe -- movie <tmdb_id>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use watchlist::config::AppConfig;
use watchlist::filter::{sort_results, FilterCriteria, SortMode};
use watchlist::models::MovieRecord;
use watchlist::tmdb::{CatalogApi, CatalogRequest, TmdbClient};

fn parse_args(args: &[String]) -> Result<(FilterCriteria, u32)> {
    let mut criteria = FilterCriteria::default();
    let mut page = 1;
    let mut it = args.iter();
    while let Some(flag) = it.next() {
        let mut value = || {
            it.next()
                .cloned()
                .with_context(|| format!("missing value for {flag}"))
        };
        match flag.as_str() {
            "--genres" => {
                criteria.genres = value()?
                    .split(',')
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .collect()
            }
            "--from" => criteria.year_from = Some(value()?),
            "--to" => criteria.year_to = Some(value()?),
            "--min" => criteria.rating_min = Some(value()?),
            "--max" => criteria.rating_max = Some(value()?),
            "--sort" => {
                criteria.sort_mode = match value()?.as_str() {
                    "rating" => SortMode::ByRating,
                    "date" => SortMode::ByReleaseDate,
                    _ => SortMode::Default,
                }
            }
            "--page" => page = value()?.parse().context("--page must be a number")?,
            other => anyhow::bail!("unknown flag {other}"),
        }
    }
    Ok((criteria, page))
}

fn print_movie(movie: &MovieRecord) {
    println!(
        "{:>8}  {:<10}  {:>4.1}  {:<40}  {}",
        movie.id,
        movie.release_date,
        movie.rating,
        movie.title,
        movie.genre_label()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    let args: Vec<String> = env::args().skip(1).collect();
    let mode = args
        .first()
        .context("usage: catalog_probe <discover|search|movie> ...")?;

    let config = AppConfig::from_env()?;
    let client = TmdbClient::from_config(&config)?;

    if mode == "movie" {
        let id: i32 = args
            .get(1)
            .context("movie id required")?
            .parse()
            .context("movie id must be numeric")?;
        let movie = client.fetch_movie(id).await?;
        print_movie(&movie);
        println!("poster: {}", movie.poster_url().unwrap_or_default());
        return Ok(());
    }

    let (criteria, page) = match mode.as_str() {
        "discover" => parse_args(&args[1..])?,
        "search" => {
            let text = args.get(1).context("search text required")?.clone();
            let (mut criteria, page) = parse_args(&args[2..])?;
            criteria.text_query = Some(text);
            (criteria, page)
        }
        other => anyhow::bail!("unknown mode {other}"),
    };

    let request = criteria.to_request(page);
    match &request {
        CatalogRequest::Discover(params) => {
            println!("GET discover/movie");
            for (key, value) in params.query_pairs() {
                println!("  {key} = {value}");
            }
        }
        CatalogRequest::Search { query, page } => {
            println!("GET search/movie\n  query = {query}\n  page = {page}");
        }
    }

    let mut result = request.send(&client).await?;
    sort_results(&mut result.results, criteria.sort_mode);
    println!(
        "page {}/{} ({} results)",
        result.page,
        result.total_pages,
        result.results.len()
    );
    for movie in &result.results {
        print_movie(movie);
    }
    Ok(())
}
