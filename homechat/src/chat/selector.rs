//! Active conversation, composer draft and per-thread history state.

use std::collections::HashMap;

use homechat_proto::message::ConversationId;

/// Load state of a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HistoryState {
    /// Never requested.
    #[default]
    NotLoaded,
    /// A request is in flight; the pane shows a loading indicator.
    Loading,
    /// The authoritative history has been merged.
    Loaded,
    /// The last request failed; the pane shows an error state.
    Failed(String),
}

/// What the caller must do after a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Request the history from the collaborator.
    LoadHistory,
    /// History is cached; nothing to fetch.
    Cached,
    /// A history request for this conversation is already in flight.
    InFlight,
    /// The conversation was already active; nothing changed.
    AlreadyActive,
}

/// Tracks which conversation is on screen.
///
/// At most one conversation is active. Switching clears the draft and
/// raises the scroll-to-bottom intent for the new thread.
#[derive(Debug, Default)]
pub struct ConversationSelector {
    active: Option<ConversationId>,
    draft: String,
    scroll_to_bottom: bool,
    history: HashMap<ConversationId, HistoryState>,
}

impl ConversationSelector {
    /// Creates a selector with nothing active.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The active conversation, if any.
    #[must_use]
    pub const fn active(&self) -> Option<ConversationId> {
        self.active
    }

    /// Whether `id` is the active conversation.
    #[must_use]
    pub fn is_active(&self, id: ConversationId) -> bool {
        self.active == Some(id)
    }

    /// Make `id` the active conversation.
    pub fn select(&mut self, id: ConversationId) -> Selection {
        if self.is_active(id) {
            return Selection::AlreadyActive;
        }
        self.active = Some(id);
        self.draft.clear();
        self.scroll_to_bottom = true;

        let state = self.history.entry(id).or_default();
        match state {
            HistoryState::Loaded => Selection::Cached,
            HistoryState::Loading => Selection::InFlight,
            HistoryState::NotLoaded | HistoryState::Failed(_) => {
                *state = HistoryState::Loading;
                Selection::LoadHistory
            }
        }
    }

    /// History state of a conversation.
    #[must_use]
    pub fn history_state(&self, id: ConversationId) -> &HistoryState {
        const NOT_LOADED: &HistoryState = &HistoryState::NotLoaded;
        self.history.get(&id).unwrap_or(NOT_LOADED)
    }

    /// Record the outcome of a history request.
    pub fn finish_load(&mut self, id: ConversationId, outcome: Result<(), String>) {
        let state = match outcome {
            Ok(()) => HistoryState::Loaded,
            Err(reason) => HistoryState::Failed(reason),
        };
        self.history.insert(id, state);
    }

    /// Forget the history state so the next selection reloads.
    pub fn forget(&mut self, id: ConversationId) {
        self.history.remove(&id);
    }

    /// Current composer text.
    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    /// Replace the composer text.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Empty the composer.
    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    /// Consume the scroll-to-bottom intent.
    pub const fn take_scroll_intent(&mut self) -> bool {
        std::mem::replace(&mut self.scroll_to_bottom, false)
    }

    /// Ask the view to scroll to the newest message.
    pub const fn request_scroll(&mut self) {
        self.scroll_to_bottom = true;
    }
}
