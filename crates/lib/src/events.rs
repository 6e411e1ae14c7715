//! Chatwoot webhook payload types.
//!
//! Only the fields the relay reads are modelled; everything else in the payload is ignored.

use serde::{Deserialize, Deserializer};

/// Webhook event name. Unrecognised names are kept rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Event {
    ConversationCreated,
    ConversationUpdated,
    ConversationStatusChanged,
    ConversationTypingOn,
    ConversationTypingOff,
    MessageCreated,
    MessageUpdated,
    ContactCreated,
    ContactUpdated,
    WebwidgetTriggered,
    Unknown(String),
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Event::ConversationCreated => "conversation_created",
            Event::ConversationUpdated => "conversation_updated",
            Event::ConversationStatusChanged => "conversation_status_changed",
            Event::ConversationTypingOn => "conversation_typing_on",
            Event::ConversationTypingOff => "conversation_typing_off",
            Event::MessageCreated => "message_created",
            Event::MessageUpdated => "message_updated",
            Event::ContactCreated => "contact_created",
            Event::ContactUpdated => "contact_updated",
            Event::WebwidgetTriggered => "webwidget_triggered",
            Event::Unknown(name) => name,
        }
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        match name.as_str() {
            "conversation_created" => Event::ConversationCreated,
            "conversation_updated" => Event::ConversationUpdated,
            "conversation_status_changed" => Event::ConversationStatusChanged,
            "conversation_typing_on" => Event::ConversationTypingOn,
            "conversation_typing_off" => Event::ConversationTypingOff,
            "message_created" => Event::MessageCreated,
            "message_updated" => Event::MessageUpdated,
            "contact_created" => Event::ContactCreated,
            "contact_updated" => Event::ContactUpdated,
            "webwidget_triggered" => Event::WebwidgetTriggered,
            _ => Event::Unknown(name),
        }
    }
}

/// Body of a `conversation_created` webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationCreatedEvent {
    pub event: Event,
    /// Conversation id.
    pub id: u64,
    /// Messages in conversation order; missing or null is treated as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Message>,
}

/// One message inside the webhook payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub content: String,
    pub account_id: u64,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Message>>::deserialize(deserializer)?.unwrap_or_default())
}

impl ConversationCreatedEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn first_message(&self) -> Option<&Message> {
        self.messages.first()
    }
}
