//! Persistence layer: sqlx models with natural-key upserts and the bounded
//! retry wrapper used by every worker-side database call.

pub mod pages;
pub mod pillars;
pub mod retry;

pub use pages::{NewPage, Page, PageLink, PageStatus};
pub use pillars::{Draft, Match, Pillar};
pub use retry::{is_transient, with_db_retry};
