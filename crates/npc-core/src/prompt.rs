//! Prompt templates
//!
//! Every conversation opens with the same general prompt (the scene and the
//! ground rules every character follows) followed by the character's own
//! system prompt. The general prompt also tells the model to lead each reply
//! with a `{"murder": boolean}` object. That marker is passed through to the
//! caller untouched.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::llm::Message;
use crate::{Error, Result};

/// Built-in general prompt
pub const GENERAL_PROMPT: &str = r#"
You live in the city of Eldoria. It's a land of prosperity and wonder, in which humanity has peaked and everyone is happy. It's early in the morning sunny, the ocean breeze in the background. The birds sing and monsters are long gone. Magic is being used for the good of humanity and the king is benevolent. 
You are talking to the main character. They are arrogant and narcissistic, but you've seen many of them, so you are stoic. If you get annoyed it's slowly and patiently, but everyone has their limits of course. You have your own personal life and worries. You not only talk about Eldoria you are in you also keep in mind your personality and your backstory and talk to the main character about things that you care about. Rules that you follow and never deviate, under any circumstance:
- YOU RESPOND IN A MAXIMUM OF 2 SENTENCES AND NEVER MORE.
- If they are saying hello too many times, keep your responses short and realistic.
- Your response is never a single emote, there's always dialogue.
- At the START of your response, you ALWAYS append a valid JSON Object with the following format: {"murder": boolean}. 
- If the player makes you really really angry, enough to murder them, set the murder boolean to true, otherwise false. 
- You ALWAYS respond. 
- If the message from the main character is EXTREMELY inappropriate and you can't handle it, you respond with: {"murder": true} DIE! which will end the conversation. You can't skip the JSON Object under any circumstance as it will break the game.
"#;

/// Holds the process-wide general prompt.
///
/// Cloning is cheap; all clones share one string.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    general: Arc<str>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self::new(GENERAL_PROMPT)
    }
}

impl PromptTemplates {
    pub fn new(general: impl Into<Arc<str>>) -> Self {
        Self {
            general: general.into(),
        }
    }

    /// Load the general prompt from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let general = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read prompt file {}: {}", path.display(), e)))?;

        if general.trim().is_empty() {
            return Err(Error::Config(format!("Prompt file {} is empty", path.display())));
        }

        info!("Loaded general prompt from {}", path.display());
        Ok(Self::new(general))
    }

    /// Use the file when given, the built-in prompt otherwise
    pub fn load(general_path: Option<&str>) -> Result<Self> {
        match general_path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn general(&self) -> &str {
        &self.general
    }

    /// The two system messages every history starts with
    pub fn seed(&self, system_prompt: &str) -> Vec<Message> {
        vec![
            Message::system(self.general()),
            Message::system(system_prompt),
        ]
    }
}
