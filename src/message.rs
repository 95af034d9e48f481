use serde::{Deserialize, Serialize};

/// One entry of the host's live chat transcript. Field names follow the host's JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub mes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_mes: Option<String>,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub swipes: Vec<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            mes: text.into(),
            is_user: true,
            ..Self::default()
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            mes: text.into(),
            ..Self::default()
        }
    }

    /// The raw text, falling back to the alternate field when the primary is empty.
    pub fn text(&self) -> &str {
        if !self.mes.is_empty() {
            return &self.mes;
        }
        self.original_mes.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

// One role-tagged turn of an assembled request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_falls_back_to_original() {
        let message = ChatMessage {
            original_mes: Some("raw".into()),
            ..ChatMessage::default()
        };
        assert_eq!(message.text(), "raw");
        assert_eq!(ChatMessage::default().text(), "");
        assert_eq!(ChatMessage::assistant("hi").text(), "hi");
    }

    #[test]
    fn parses_host_records() {
        let json = r#"[{"name":"Ann","is_user":true,"mes":"hello"},{"mes":"","original_mes":"hey","is_user":false,"extra":{}}]"#;
        let messages: Vec<ChatMessage> = serde_json::from_str(json).unwrap();
        assert!(messages[0].is_user);
        assert_eq!(messages[1].text(), "hey");
    }
}
