use super::TraceSequence;
use crate::geo::Section;
use anyhow::Result;

/// Source of raw GPS sequences (e.g., Mapillary).
///
/// Discovery and download are separate steps: a long drive shows up in
/// every section it crosses, and the driver fetches and matches each
/// sequence id only once. Errors are treated as transient and retried by
/// the driver.
#[async_trait::async_trait]
pub trait TraceProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    /// Drops sections the provider knows hold no data, keeping the order of
    /// the rest. The default keeps every section.
    async fn select_sections(&self, sections: Vec<Section>) -> Result<Vec<Section>> {
        Ok(sections)
    }

    /// Ids of every sequence found in `section`, sorted.
    async fn sequence_ids(&self, section: &Section) -> Result<Vec<String>>;

    /// Downloads one sequence. `None` when the provider declines it, e.g.
    /// because it has too few images to be worth matching.
    async fn fetch_sequence(&self, id: &str) -> Result<Option<TraceSequence>>;
}
