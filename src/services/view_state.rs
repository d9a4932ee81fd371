use serde::Serialize;
use crate::error::{ChatError, Result};
use crate::models::{SelectionContext, TextSelectionSource};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadModal {
    pub open: bool,
    pub in_flight: bool,
    pub progress: u8,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferencePopup {
    pub open: bool,
    pub draft: String,
}

/// Transient window state. Nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub input: String,
    pub upload: UploadModal,
    pub selection_popup: Option<SelectionContext>,
    pub reference_popup: ReferencePopup,
}

impl ViewState {
    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
    }

    /// Clears and returns the input, for sending.
    pub fn take_input(&mut self) -> String {
        std::mem::take(&mut self.input)
    }

    // Upload modal

    pub fn open_upload_modal(&mut self) {
        self.upload.open = true;
    }

    pub fn close_upload_modal(&mut self) {
        if !self.upload.in_flight {
            self.upload = UploadModal::default();
        }
    }

    /// Marks an upload as started. Only one may run at a time.
    pub fn begin_upload(&mut self, file_name: &str) -> Result<()> {
        if self.upload.in_flight {
            return Err(ChatError::UploadInProgress);
        }
        self.upload = UploadModal {
            open: true,
            in_flight: true,
            progress: 0,
            file_name: Some(file_name.to_string()),
        };
        Ok(())
    }

    pub fn set_upload_progress(&mut self, percent: u8) {
        if self.upload.in_flight {
            self.upload.progress = self.upload.progress.max(percent.min(100));
        }
    }

    /// Ends the running upload. The modal closes on success and stays open
    /// on failure so the user can pick another file.
    pub fn finish_upload(&mut self, succeeded: bool) {
        if succeeded {
            self.upload = UploadModal::default();
        } else {
            self.upload.in_flight = false;
            self.upload.progress = 0;
        }
    }

    // Selection popup

    pub fn sync_selection(&mut self, source: &dyn TextSelectionSource) {
        self.selection_popup = source
            .current_selection()
            .filter(|s| !s.text.trim().is_empty());
    }

    /// Consumes the selection and returns the question to send about it.
    pub fn ask_about_selection(&mut self) -> Option<String> {
        let selection = self.selection_popup.take()?;
        Some(format!("Explain this: \"{}\"", selection.text.trim()))
    }

    // Reference popup

    pub fn open_reference_popup(&mut self) {
        self.reference_popup = ReferencePopup {
            open: true,
            draft: String::new(),
        };
    }

    pub fn set_reference_draft(&mut self, text: &str) {
        if self.reference_popup.open {
            self.reference_popup.draft = text.to_string();
        }
    }

    /// Puts the quoted reference in front of whatever is already typed.
    pub fn confirm_reference(&mut self) {
        let reference = std::mem::take(&mut self.reference_popup).draft;
        let reference = reference.trim();
        if reference.is_empty() {
            return;
        }
        self.input = if self.input.is_empty() {
            format!("\"{}\" ", reference)
        } else {
            format!("\"{}\" {}", reference, self.input)
        };
    }

    pub fn cancel_reference(&mut self) {
        self.reference_popup = ReferencePopup::default();
    }
}
