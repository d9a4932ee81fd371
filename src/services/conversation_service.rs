use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, warn};
use serde::Serialize;

use crate::error::{ChatError, Result};
use crate::models::{ConversationExport, Message, UploadFile, UploadedDocument};
use super::api_client::{ConverseRequest, FileUpload, ProgressFn, QueryEndpoint, SpeechToText};
use super::voice_service::{AudioCapture, RecorderStatus, VoiceRecorder};

pub const FALLBACK_ANSWER: &str =
    "Sorry, something went wrong while answering. Please try again.";
pub const NOTHING_HEARD_NOTICE: &str = "Sorry, I could not hear a question. Please try again.";

/// Called after anything the view shows has changed, including changes
/// no user action triggered such as a recording hitting its time limit.
pub type ChangeFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct ConversationState {
    messages: Vec<Message>,
    document: Option<UploadedDocument>,
    banner: Option<String>,
    notice: Option<String>,
    pending_queries: usize,
}

/// What the view needs to redraw.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub document: Option<UploadedDocument>,
    pub banner: Option<String>,
    pub notice: Option<String>,
    pub pending_queries: usize,
    pub recording: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VoiceOutcome {
    Started,
    /// The microphone is still opening; the toggle was ignored.
    StillStarting,
    Asked { question: String },
    NothingHeard,
}

/// Owns the message log, the active document and the conversation id,
/// and routes user intents to the backend.
///
/// The log is append-only. Queries are not serialised against each other,
/// so answers to overlapping queries land in completion order.
pub struct Conversation {
    state: Mutex<ConversationState>,
    conversation_id: Option<String>,
    uploads: Arc<dyn FileUpload>,
    speech: Arc<dyn SpeechToText>,
    queries: Arc<dyn QueryEndpoint>,
    recorder: VoiceRecorder,
    max_recording: Duration,
    on_change: Mutex<Option<ChangeFn>>,
}

impl Conversation {
    pub fn new<B>(
        conversation_id: Option<String>,
        backend: Arc<B>,
        capture: Arc<dyn AudioCapture>,
        max_recording: Duration,
    ) -> Self
    where
        B: FileUpload + SpeechToText + QueryEndpoint + 'static,
    {
        Self {
            state: Mutex::new(ConversationState::default()),
            conversation_id,
            uploads: backend.clone(),
            speech: backend.clone(),
            queries: backend,
            recorder: VoiceRecorder::new(capture),
            max_recording,
            on_change: Mutex::new(None),
        }
    }

    pub fn set_change_listener(&self, listener: ChangeFn) {
        *self.on_change.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    /// Never call with the state lock held.
    fn notify_changed(&self) {
        let listener = self
            .on_change
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConversationState> {
        // The state holds plain data; a panic elsewhere cannot leave it
        // half-updated, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock_state().messages.clone()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.lock_state().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn document(&self) -> Option<UploadedDocument> {
        self.lock_state().document.clone()
    }

    pub fn banner(&self) -> Option<String> {
        self.lock_state().banner.clone()
    }

    pub fn notice(&self) -> Option<String> {
        self.lock_state().notice.clone()
    }

    pub fn pending_queries(&self) -> usize {
        self.lock_state().pending_queries
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn recorder_status(&self) -> RecorderStatus {
        self.recorder.status()
    }

    pub fn dismiss_banner(&self) {
        self.lock_state().banner = None;
        self.notify_changed();
    }

    pub fn dismiss_notice(&self) {
        self.lock_state().notice = None;
        self.notify_changed();
    }

    /// Puts an error in the banner.
    pub fn show_error(&self, err: &ChatError) {
        self.lock_state().banner = Some(err.to_string());
        self.notify_changed();
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        let recording = self.recorder.status() != RecorderStatus::Idle;
        let state = self.lock_state();
        ConversationSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: state.messages.clone(),
            document: state.document.clone(),
            banner: state.banner.clone(),
            notice: state.notice.clone(),
            pending_queries: state.pending_queries,
            recording,
        }
    }

    /// Appends the user message right away, then asks the backend. A
    /// failed request still produces exactly one assistant message, the
    /// fallback text, and puts the error in the banner.
    pub async fn submit_query(&self, text: &str) -> Result<Message> {
        let query = text.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyQuery);
        }

        let request = {
            let mut state = self.lock_state();
            state.messages.push(Message::user(query));
            state.pending_queries += 1;
            ConverseRequest {
                query: query.to_string(),
                doc_id: state.document.as_ref().map(|d| d.id.clone()),
                conversation_id: self.conversation_id.clone(),
            }
        };
        self.notify_changed();
        debug!("Submitting query ({} chars)", query.len());

        let result = self.queries.converse(request).await;

        let outcome = {
            let mut state = self.lock_state();
            state.pending_queries = state.pending_queries.saturating_sub(1);
            match result {
                Ok(answer) => {
                    let message = Message::assistant(&answer);
                    state.messages.push(message.clone());
                    Ok(message)
                }
                Err(e) => {
                    error!("Query failed: {}", e);
                    state.messages.push(Message::assistant(FALLBACK_ANSWER));
                    state.banner = Some(e.to_string());
                    Err(e)
                }
            }
        };
        self.notify_changed();
        outcome
    }

    /// Uploads a document and makes it the active one, dropping the
    /// reference to any previous document.
    pub async fn upload_document(
        &self,
        file: UploadFile,
        progress: ProgressFn,
    ) -> Result<UploadedDocument> {
        match self.uploads.upload(file, progress).await {
            Ok(document) => {
                let previous = self.lock_state().document.replace(document.clone());
                if let Some(previous) = previous {
                    debug!("Replaced active document {}", previous.id);
                }
                self.notify_changed();
                Ok(document)
            }
            Err(e) => {
                error!("Upload failed: {}", e);
                self.show_error(&e);
                Err(e)
            }
        }
    }

    pub fn clear_document(&self) {
        self.lock_state().document = None;
        self.notify_changed();
    }

    /// Starts a recording, or stops the running one and asks the question
    /// it contains. A started recording also stops by itself after the
    /// configured limit. Toggles while the microphone is still opening are
    /// ignored.
    pub async fn toggle_recording(self: &Arc<Self>) -> Result<VoiceOutcome> {
        match self.recorder.status() {
            RecorderStatus::Recording => return self.finish_recording(None).await,
            RecorderStatus::Starting => {
                debug!("Ignoring toggle while the microphone opens");
                return Ok(VoiceOutcome::StillStarting);
            }
            RecorderStatus::Idle => {}
        }

        let session = match self.recorder.start().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not start recording: {}", e);
                self.show_error(&e);
                return Err(e);
            }
        };

        let this = Arc::clone(self);
        let limit = self.max_recording;
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            match this.finish_recording(Some(session)).await {
                Ok(_) | Err(ChatError::NotRecording) => {}
                Err(e) => warn!("Timed stop of recording {} failed: {}", session, e),
            }
        });

        self.notify_changed();
        Ok(VoiceOutcome::Started)
    }

    async fn finish_recording(&self, session: Option<u64>) -> Result<VoiceOutcome> {
        let clip = match self.recorder.stop(session).await {
            Ok(clip) => clip,
            Err(ChatError::NotRecording) => return Err(ChatError::NotRecording),
            Err(e) => {
                self.show_error(&e);
                return Err(e);
            }
        };
        self.notify_changed();

        let doc_id = self.document().map(|d| d.id);
        match self.speech.transcribe(clip, doc_id).await {
            Ok(Some(question)) => {
                // A failed answer is already reported through the log and
                // the banner.
                let _ = self.submit_query(&question).await;
                Ok(VoiceOutcome::Asked { question })
            }
            Ok(None) => {
                self.lock_state().notice = Some(NOTHING_HEARD_NOTICE.to_string());
                self.notify_changed();
                Ok(VoiceOutcome::NothingHeard)
            }
            Err(e) => {
                error!("Transcription failed: {}", e);
                self.show_error(&e);
                Err(e)
            }
        }
    }

    pub fn export(&self) -> ConversationExport {
        let state = self.lock_state();
        ConversationExport {
            conversation_id: self.conversation_id.clone(),
            messages: state.messages.clone(),
            uploaded_doc: state.document.clone(),
            exported_at: Utc::now(),
        }
    }
}
