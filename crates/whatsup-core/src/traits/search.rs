//! Web search trait — backs the `search` command.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::SearchHit;

#[async_trait]
pub trait Searcher: Send + Sync {
    fn name(&self) -> &str;

    /// Run a query and return at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}
