//! In-memory session store keyed by character name

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::prompt::PromptTemplates;
use crate::session::ConversationManager;
use crate::{Error, Result};

/// Shared handle to one character's conversation.
///
/// Holding the lock for the length of a turn keeps two requests for the
/// same character from interleaving their appends.
pub type SessionHandle = Arc<Mutex<ConversationManager>>;

struct Entry {
    conversation: SessionHandle,
    last_used: AtomicU64,
}

/// Maps character names to their conversations
pub struct SessionStore {
    templates: PromptTemplates,
    sessions: RwLock<HashMap<String, Entry>>,
    /// Maximum live conversations (None = unlimited)
    max_sessions: Option<usize>,
    clock: AtomicU64,
}

impl SessionStore {
    /// Create an unbounded session store
    pub fn new(templates: PromptTemplates) -> Self {
        Self::with_options(templates, None)
    }

    /// Create a session store that keeps at most `max_sessions` conversations
    pub fn with_options(templates: PromptTemplates, max_sessions: Option<usize>) -> Self {
        Self {
            templates,
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.filter(|&max| max > 0),
            clock: AtomicU64::new(0),
        }
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get the conversation for a character, creating it on first contact.
    ///
    /// An existing conversation is returned as is and `system_prompt` is
    /// ignored. A new one needs a non-blank `system_prompt`; without it the
    /// call fails with `MissingSystemPrompt` and nothing is inserted.
    ///
    /// At capacity, the least recently used conversation that nobody else
    /// holds a handle to is evicted. When every conversation is in use the
    /// store grows past its limit until one is released.
    pub async fn get_or_create(&self, npc_name: &str, system_prompt: Option<&str>) -> Result<SessionHandle> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entry) = sessions.get(npc_name) {
                debug!("Conversation found for NPC: {}", npc_name);
                entry.last_used.store(self.tick(), Ordering::Relaxed);
                return Ok(entry.conversation.clone());
            }
        }

        let system_prompt = system_prompt
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::missing_system_prompt(npc_name))?;

        let mut sessions = self.sessions.write().await;

        // another request may have created it while we waited for the write lock
        if let Some(entry) = sessions.get(npc_name) {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            return Ok(entry.conversation.clone());
        }

        if let Some(max) = self.max_sessions {
            while sessions.len() >= max {
                // a handle held outside the store means a turn is in flight
                let Some(oldest) = sessions
                    .iter()
                    .filter(|(_, entry)| Arc::strong_count(&entry.conversation) == 1)
                    .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                    .map(|(name, _)| name.clone())
                else {
                    warn!(
                        "All {} conversations are in use, exceeding the limit of {}",
                        sessions.len(),
                        max
                    );
                    break;
                };
                sessions.remove(&oldest);
                info!("Evicted least recently used conversation for NPC: {}", oldest);
            }
        }

        info!("Creating new conversation for NPC: {}", npc_name);
        let conversation = Arc::new(Mutex::new(ConversationManager::new(
            npc_name,
            &self.templates,
            system_prompt,
        )));
        sessions.insert(
            npc_name.to_string(),
            Entry {
                conversation: conversation.clone(),
                last_used: AtomicU64::new(self.tick()),
            },
        );

        Ok(conversation)
    }

    /// Look up a conversation without creating it
    pub async fn get(&self, npc_name: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(npc_name).map(|entry| entry.conversation.clone())
    }

    /// Restart a character's conversation under the same key.
    ///
    /// A non-blank `system_prompt` replaces the old one; otherwise the
    /// current system prompt is kept. An unknown character is created, which
    /// requires a system prompt.
    pub async fn reset(&self, npc_name: &str, system_prompt: Option<&str>) -> Result<SessionHandle> {
        let system_prompt = system_prompt.filter(|s| !s.trim().is_empty());

        let Some(conversation) = self.get(npc_name).await else {
            return self.get_or_create(npc_name, system_prompt).await;
        };

        {
            let mut conversation = conversation.lock().await;
            let prompt = system_prompt
                .map(str::to_string)
                .unwrap_or_else(|| conversation.system_prompt().to_string());
            conversation.reset(&prompt);
        }
        info!("Reset conversation for NPC: {}", npc_name);

        Ok(conversation)
    }

    /// Drop a character's conversation. Returns false if there was none.
    pub async fn remove(&self, npc_name: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(npc_name).is_some();
        if removed {
            info!("Closed conversation for NPC: {}", npc_name);
        }
        removed
    }

    pub async fn contains(&self, npc_name: &str) -> bool {
        self.sessions.read().await.contains_key(npc_name)
    }

    /// Number of live conversations
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Names of all characters with a live conversation, sorted
    pub async fn npc_names(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut names: Vec<String> = sessions.keys().cloned().collect();
        names.sort();
        names
    }
}
