//! Conversation label relay — receives Chatwoot `conversation_created` webhooks, classifies the
//! first message with an OpenAI assistant, and writes the labels back to the conversation.

pub mod channels;
pub mod config;
pub mod events;
pub mod gateway;
pub mod labels;
pub mod llm;
pub mod relay;
