use serde::Serialize;

/// System instruction that turns off the extended reasoning trace of Qwen3-style models.
pub const NOTHINK_SYSTEM_PROMPT: &str = "/nothink";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// How raw harness prompts are presented to the engine. Chosen once, when the
/// completion model is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    /// Free-form continuation of the stripped prompt text.
    Plain,
    /// Two-turn conversation: a fixed system instruction, then the prompt as the user turn.
    Chat { system_prompt: String },
}

/// A batch of prompts already shaped for one of the engine entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptBatch {
    Plain(Vec<String>),
    Chat(Vec<Vec<ChatMessage>>),
}

impl PromptMode {
    pub fn from_nothink_flag(use_nothink_sysprompt: bool) -> Self {
        if use_nothink_sysprompt {
            Self::Chat {
                system_prompt: NOTHINK_SYSTEM_PROMPT.to_string(),
            }
        } else {
            Self::Plain
        }
    }

    pub fn format(&self, prompts: &[String]) -> PromptBatch {
        match self {
            Self::Plain => PromptBatch::Plain(prompts.iter().map(|p| p.trim().to_string()).collect()),
            Self::Chat { system_prompt } => PromptBatch::Chat(
                prompts
                    .iter()
                    .map(|p| vec![ChatMessage::system(system_prompt.as_str()), ChatMessage::user(p.as_str())])
                    .collect(),
            ),
        }
    }
}
