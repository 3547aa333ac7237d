use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::chat::ChatResponse;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded by a streaming router call.
///
/// A well-formed stream is zero or more `text_delta` events followed by
/// exactly one `message_done` carrying the validated full response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "message_done")]
    MessageDone { response: ChatResponse },
}
