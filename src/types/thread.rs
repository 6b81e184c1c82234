use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a thread item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// Source reference attached to an assistant answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub snippet: String,
}

/// One exchange unit in the visible conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadItem {
    pub id: Uuid,
    pub sender: Sender,
    pub text: String,
    pub citations: Vec<Citation>,
}

impl ThreadItem {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::User,
            text: text.into(),
            citations: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Sender::Assistant,
            text: text.into(),
            citations,
        }
    }
}

/// Insertion-ordered session transcript.
#[derive(Debug, Default, Clone)]
pub struct Thread {
    items: Vec<ThreadItem>,
}

impl Thread {
    pub fn push(&mut self, item: ThreadItem) {
        self.items.push(item);
    }

    /// Remove an item by id, returning it if present.
    pub fn remove(&mut self, id: Uuid) -> Option<ThreadItem> {
        let idx = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(idx))
    }

    pub fn items(&self) -> &[ThreadItem] {
        &self.items
    }
}
