//! Support platform connectors.
//!
//! [`Annotator`] is the seam the relay uses to write labels back; [`ChatwootClient`] implements
//! it against the Chatwoot application API.

mod annotator;
mod chatwoot;

pub use annotator::Annotator;
pub use chatwoot::{ChatwootClient, ChatwootError};
