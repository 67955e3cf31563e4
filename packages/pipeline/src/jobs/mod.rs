//! Durable job queue and the four pipeline job handlers.
//!
//! Jobs live in Postgres; each handler type gets its own consumer loop
//! claiming work via FOR UPDATE SKIP LOCKED. Cancellation and pausing are
//! cooperative flags observed between items.

pub mod analyze;
pub mod crawl;
pub mod generate;
pub mod job;
pub mod matching;
pub mod progress;
pub mod worker;

pub use analyze::AnalyzeJobHandler;
pub use crawl::{CrawlArgs, CrawlJobHandler};
pub use generate::GenerateJobHandler;
pub use job::{Job, JobStatus, JobType, CANCELLED_MESSAGE};
pub use matching::{MatchArgs, MatchJobHandler};
pub use progress::{CrawlProgress, ItemProgress, ScannedPage};
pub use worker::{ConsumerConfig, JobConsumer, JobHandler};
