//! Documents page: the uploaded-document list and a two-step delete.
//!
//! Talks to the gateway directly, not through the chat controller. Nothing is cached beyond
//! the list on screen, and a delete never removes a row locally; the list is refetched.

use crate::api::{ApiError, ChatApi, Document, DocumentId};
use crate::chat::{Operation, RequestFence, Ticket};

pub const DELETE_FAILED_NOTICE: &str = "Delete failed";
pub const DELETE_CONFIRM_PROMPT: &str = "Are you sure you want to delete this document?";
pub const EMPTY_DOCUMENTS_TEXT: &str = "No documents uploaded yet";

pub struct DocumentsPage<A> {
    api: A,
    documents: Vec<Document>,
    loading: bool,
    pending_delete: Option<DocumentId>,
    fence: RequestFence,
}

impl<A: ChatApi> DocumentsPage<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            documents: Vec::new(),
            loading: false,
            pending_delete: None,
            fence: RequestFence::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Document awaiting confirmation, if any.
    pub fn pending_delete(&self) -> Option<DocumentId> {
        self.pending_delete
    }

    pub fn begin_refresh(&mut self) -> Ticket {
        self.loading = true;
        self.fence.issue(Operation::ListDocuments)
    }

    /// Apply a list result. A failure shows an empty list.
    pub fn finish_refresh(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<Document>, ApiError>,
    ) -> Result<(), ApiError> {
        if !self.fence.is_current(ticket) {
            log::debug!("dropping stale document list");
            return Ok(());
        }
        self.loading = false;
        match result {
            Ok(documents) => {
                self.documents = documents;
                Ok(())
            }
            Err(e) => {
                log::error!("loading documents failed: {}", e);
                self.documents.clear();
                Err(e)
            }
        }
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let ticket = self.begin_refresh();
        let result = self.api.list_documents().await;
        self.finish_refresh(ticket, result)
    }

    /// First step of a delete: ask for confirmation.
    pub fn request_delete(&mut self, id: DocumentId) {
        self.pending_delete = Some(id);
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    /// Consume the confirmed delete target.
    pub fn take_pending_delete(&mut self) -> Option<DocumentId> {
        self.pending_delete.take()
    }

    /// Record a delete result. On success the caller refetches the list.
    pub fn finish_delete(&mut self, id: DocumentId, result: Result<(), ApiError>) -> Result<(), ApiError> {
        match result {
            Ok(()) => {
                log::info!("deleted document {}", id);
                Ok(())
            }
            Err(e) => {
                log::error!("deleting document {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    /// Delete the confirmed document and refetch. Returns `Ok(false)` if nothing was pending.
    pub async fn confirm_delete(&mut self) -> Result<bool, ApiError> {
        let Some(id) = self.take_pending_delete() else {
            return Ok(false);
        };
        let result = self.api.delete_document(id).await;
        self.finish_delete(id, result)?;
        self.refresh().await?;
        Ok(true)
    }

    /// Forget everything, e.g. on logout.
    pub fn reset(&mut self) {
        self.fence.invalidate_all();
        self.documents.clear();
        self.loading = false;
        self.pending_delete = None;
    }
}
