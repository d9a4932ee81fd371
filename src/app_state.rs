use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Message, UploadFile, UploadedDocument};
use crate::services::api_client::{ApiClient, ProgressFn};
use crate::services::config_service;
use crate::services::conversation_service::Conversation;
use crate::services::file_service::SessionStore;
use crate::services::view_state::ViewState;
use crate::services::voice_service::AudioCapture;

/// Everything one window works with: the conversation plus the transient
/// view state around it.
pub struct AppState {
    pub conversation: Arc<Conversation>,
    view: Arc<Mutex<ViewState>>,
}

impl AppState {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation: Arc::new(conversation),
            view: Arc::new(Mutex::new(ViewState::default())),
        }
    }

    /// Builds the state from the saved config and session file. Broken
    /// local files fall back to defaults; a config problem ends up in the
    /// banner instead of stopping the app.
    pub fn bootstrap(capture: Arc<dyn AudioCapture>) -> Result<Self> {
        let (config, config_problem) = config_service::get_effective_config();
        let conversation_id = match SessionStore::open_default() {
            Ok(store) => store.load_or_create_conversation_id(),
            Err(e) => {
                warn!("No session store, conversation id will not persist: {}", e);
                Uuid::new_v4().to_string()
            }
        };
        let client = Arc::new(ApiClient::from_effective(&config)?);

        info!(
            "Conversation {} against {}",
            conversation_id, config.base_url
        );
        let state = Self::new(Conversation::new(
            Some(conversation_id),
            client,
            capture,
            config.max_recording,
        ));
        if let Some(problem) = config_problem {
            state.conversation.show_error(&problem);
        }
        Ok(state)
    }

    fn lock_view(&self) -> MutexGuard<'_, ViewState> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn view(&self) -> ViewState {
        self.lock_view().clone()
    }

    pub fn with_view<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> R {
        f(&mut *self.lock_view())
    }

    /// Sends whatever is in the input box and clears it.
    pub async fn send_input(&self) -> Result<Message> {
        let text = self.lock_view().take_input();
        self.conversation.submit_query(&text).await
    }

    pub async fn ask_about_selection(&self) -> Result<Option<Message>> {
        let question = self.lock_view().ask_about_selection();
        match question {
            Some(q) => self.conversation.submit_query(&q).await.map(Some),
            None => Ok(None),
        }
    }

    /// Runs an upload through the modal: refuses a second one while the
    /// first is in flight and mirrors progress into the view.
    pub async fn upload(&self, file: UploadFile, progress: ProgressFn) -> Result<UploadedDocument> {
        self.lock_view().begin_upload(&file.name)?;

        let view = self.view.clone();
        let on_progress: ProgressFn = Arc::new(move |p| {
            if let Ok(mut v) = view.lock() {
                v.set_upload_progress(p);
            }
            progress(p);
        });

        let result = self.conversation.upload_document(file, on_progress).await;
        self.lock_view().finish_upload(result.is_ok());
        result
    }

    pub fn is_busy_uploading(&self) -> bool {
        self.lock_view().upload.in_flight
    }
}
