use tracing::{debug, warn};

use crate::api::{ApiError, KnowledgeDocument, PlatformApi};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazy pager over a knowledge base's documents, following `nextUri` links.
///
/// Stops at the first page without a next link, or when a link repeats.
pub struct KnowledgeDocuments<'a> {
    api: &'a dyn PlatformApi,
    knowledge_base_id: String,
    cursor: Cursor,
    pages_read: usize,
}

impl<'a> KnowledgeDocuments<'a> {
    pub fn new(api: &'a dyn PlatformApi, knowledge_base_id: impl Into<String>) -> Self {
        Self { api, knowledge_base_id: knowledge_base_id.into(), cursor: Cursor::Start, pages_read: 0 }
    }

    /// The next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<KnowledgeDocument>>, ApiError> {
        let cursor = match &self.cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => None,
            Cursor::Next(next) => Some(next.clone()),
        };

        let page = self.api.knowledge_documents_page(&self.knowledge_base_id, cursor.as_deref()).await?;
        self.pages_read += 1;
        self.cursor = match page.next_uri {
            Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                warn!(
                    knowledge_base_id = %self.knowledge_base_id,
                    next_uri = %next,
                    "knowledge listing repeated its next link; stopping"
                );
                Cursor::Done
            }
            Some(next) => Cursor::Next(next),
            None => Cursor::Done,
        };
        debug!(
            knowledge_base_id = %self.knowledge_base_id,
            page = self.pages_read,
            documents = page.documents.len(),
            "read knowledge document page"
        );

        Ok(Some(page.documents))
    }

    /// Rewinds to the first page.
    pub fn restart(&mut self) {
        self.cursor = Cursor::Start;
        self.pages_read = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == Cursor::Done
    }

    /// Reads every remaining page.
    pub async fn collect_all(&mut self) -> Result<Vec<KnowledgeDocument>, ApiError> {
        let mut documents = Vec::new();
        while let Some(page) = self.next_page().await? {
            documents.extend(page);
        }
        Ok(documents)
    }
}
