//! The chat page: controller state plus the request fencing it relies on.

mod controller;
mod fence;

pub use controller::{
    percent_of, ChatController, ControllerPhase, MessagesTicket, MountStep, PendingSend,
    SelectOutcome, SendStep, UploadProgress, UploadState, UploadTicket, PLACEHOLDER_TEXT,
    SEND_FAILED_TEXT, UPLOAD_FAILED_NOTICE, UPLOAD_SUCCESS_NOTICE,
};
pub use fence::{Operation, RequestFence, Ticket};
