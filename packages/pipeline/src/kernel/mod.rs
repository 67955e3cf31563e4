//! Infrastructure kernel: external collaborator clients and their trait
//! seams. Service logic lives above this layer and depends only on the
//! `Base*` traits.

pub mod ai;
pub mod browser;
pub mod embedding;
pub mod traits;

pub use ai::OpenAIClient;
pub use browser::BrowserSession;
pub use embedding::{embedding_service_from_config, generate_with_retry, VoyageClient};
pub use traits::{BaseAI, BaseEmbeddingService, BasePageFetcher};
