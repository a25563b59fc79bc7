//! Quire - a self-hosted blog
//!
//! Posts, pages and memos written in Markdown, threaded comments with
//! spam scoring and moderation, media uploads, RSS and a sitemap, all
//! behind a JSON API.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
