use serde::{Deserialize, Serialize};

/// Screen position the selection popup is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionContext {
    pub text: String,
    pub anchor: Anchor,
}

/// Where the current on-screen text selection comes from.
pub trait TextSelectionSource {
    /// The selected text and its anchor; `None` when nothing is selected.
    fn current_selection(&self) -> Option<SelectionContext>;
}

/// Selection state as reported by the webview on `selectionchange`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedSelection {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl TextSelectionSource for ReportedSelection {
    fn current_selection(&self) -> Option<SelectionContext> {
        if self.text.trim().is_empty() {
            return None;
        }
        Some(SelectionContext {
            text: self.text.clone(),
            anchor: Anchor {
                x: self.x,
                y: self.y,
            },
        })
    }
}
