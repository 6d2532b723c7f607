pub mod app;
pub mod config;
pub mod filter;
pub mod library;
pub mod materialize;
pub mod membership;
pub mod models;
pub mod pipeline;
pub mod tmdb;
