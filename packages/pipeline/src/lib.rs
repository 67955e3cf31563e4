// Content Migration Pipeline - Core
//
// Crawls legacy websites through a headless browser, analyzes and embeds
// the extracted content, matches pages against topic pillars, and generates
// restructured drafts. All work runs as durable Postgres-backed jobs.

pub mod analyzer;
pub mod config;
pub mod crawler;
pub mod extractor;
pub mod generator;
pub mod jobs;
pub mod kernel;
pub mod matcher;
pub mod storage;

pub use config::Config;
