//! Ballot Engine Library
//!
//! Vote collection, odds pricing, winner designation and score recomputation
//! for an awards prediction game. The pure engines live in `odds_core` and
//! `scoring_core`; the `*_api` modules run them against Postgres.

pub mod config;
pub mod database;
pub mod db_adapter;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod odds_core;
pub mod scoring_api;
pub mod scoring_core;
pub mod votes_api;
pub mod winners_api;
