use crate::source::{DiscoveryError, Item, PageError, PageId};
use async_trait::async_trait;

/// Contract every catalog source implements
///
/// An adapter is purely a translation layer from remote page to item
/// sequence: it performs network I/O but never writes to the record sink or
/// the checkpoint. Implementations must be callable concurrently for different
/// pages; the only shared resource is the HTTP client.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier, used as the checkpoint key and item source tag
    fn source_id(&self) -> &str;

    /// Discovers how many pages the catalog has
    ///
    /// Called once per run. Fails when the page-count indicator cannot be
    /// parsed, which aborts the run for this source.
    async fn total_pages(&self) -> Result<u32, DiscoveryError>;

    /// Fetches one listing page and parses it into items
    async fn fetch_and_parse(&self, page: PageId) -> Result<Vec<Item>, PageError>;

    /// Validation floor for a page
    ///
    /// The last page may legitimately hold fewer items, so its floor is lower
    /// (usually zero).
    fn minimum_items(&self, page: PageId, total_pages: u32) -> usize;

    /// Looks up a document URL for an item whose listing entry had none
    async fn resolve_document_url(&self, _item: &Item) -> Option<String> {
        None
    }
}
