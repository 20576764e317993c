//! Streaming chat endpoint.
//!
//! Flow: session gate → chat rate limit → validation → open upstream stream →
//! create chat session and store the user turn → relay fragments as SSE →
//! store the assistant turn once the upstream stream is drained.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Extension,
};
use futures::Stream;
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::auth::Identity;
use crate::chat_db::{ConversationStore, MessageRole, NewMessage};
use crate::error::ApiError;
use crate::metrics::StreamGuard;
use crate::shared_state::AppState;
use crate::upstream::FragmentStream;
use crate::utils::TextUtils;
use crate::validation::{parse_body, validate, ChatMessageInput};

const KEEP_ALIVE_SECS: u64 = 15;
pub const DONE_MARKER: &str = "[DONE]";
pub const STREAM_INTERRUPTED: &str = "Stream interrupted";

/// POST /api/chat
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request_num = state.counters.inc_total_requests();
    debug!("Chat request #{} from user {}", request_num, identity.user_id);

    state.rate_limiters.chat.enforce(&identity.user_id)?;
    let input = validate::<ChatMessageInput>(&parse_body(&body)).into_result()?;

    let backend = state
        .completions
        .clone()
        .ok_or_else(ApiError::upstream_not_configured)?;

    let fragments = backend
        .stream_completion(&input.message)
        .await
        .map_err(|e| ApiError::from_upstream(e, "Failed to process request"))?;

    let session_id = state
        .conversations
        .create_session(&TextUtils::derive_title(&input.message), Some(&identity.user_id))
        .await
        .map_err(|e| {
            error!("Failed to create chat session: {:#}", e);
            ApiError::Internal("Failed to create chat session".to_string())
        })?;

    if let Err(e) = state
        .conversations
        .append_message(NewMessage::text(
            &session_id,
            MessageRole::User,
            &input.message,
            Some(&identity.user_id),
        ))
        .await
    {
        error!("Failed to store user message for session {}: {:#}", session_id, e);
    }

    state.counters.inc_streamed_completions();
    info!("Streaming completion for session {}", session_id);

    let events = relay_fragments(
        fragments,
        Arc::clone(&state.conversations),
        session_id,
        identity.user_id,
    );

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(KEEP_ALIVE_SECS)))
        .into_response())
}

/// Forward each fragment as a `{"content": ...}` event while accumulating it.
///
/// The assistant turn is stored only after the upstream sequence ends cleanly,
/// so the stored text is exactly what was sent. An upstream error ends the
/// stream with an error event and stores nothing. Dropping the stream (client
/// disconnect) stops forwarding and accumulation together.
pub fn relay_fragments(
    fragments: FragmentStream,
    store: Arc<dyn ConversationStore>,
    session_id: String,
    user_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    async_stream::stream! {
        let _guard = StreamGuard::acquire();
        let mut full_response = String::new();
        let mut fragments = fragments;

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    full_response.push_str(&fragment);
                    let data = json!({ "content": fragment }).to_string();
                    yield Ok::<_, Infallible>(Event::default().data(data));
                }
                Err(e) => {
                    warn!("Upstream stream failed for session {}: {}", session_id, e);
                    let data = json!({ "error": STREAM_INTERRUPTED }).to_string();
                    yield Ok(Event::default().data(data));
                    return;
                }
            }
        }

        if full_response.is_empty() {
            debug!("Empty completion for session {}, nothing to store", session_id);
        } else {
            let message = NewMessage::text(
                &session_id,
                MessageRole::Assistant,
                &full_response,
                Some(&user_id),
            );
            match store.append_message(message).await {
                Ok(_) => debug!(
                    "Stored assistant response ({} chars) for session {}",
                    full_response.len(),
                    session_id
                ),
                Err(e) => error!("Failed to store assistant response for session {}: {:#}", session_id, e),
            }
        }

        yield Ok(Event::default().data(DONE_MARKER));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_db::{ChatDatabase, SqliteConversationStore};
    use crate::upstream::UpstreamError;

    fn fragments(items: Vec<Result<&'static str, UpstreamError>>) -> FragmentStream {
        Box::pin(futures::stream::iter(
            items.into_iter().map(|r| r.map(str::to_string)).collect::<Vec<_>>(),
        ))
    }

    async fn session(store: &SqliteConversationStore) -> String {
        store.create_session("t", Some("u1")).await.unwrap()
    }

    #[tokio::test]
    async fn test_completed_stream_stores_concatenation() {
        let store = ChatDatabase::open_in_memory().unwrap().conversations();
        let session_id = session(&store).await;

        let events: Vec<_> = relay_fragments(
            fragments(vec![Ok("Hel"), Ok("lo"), Ok("!")]),
            Arc::new(store.clone()),
            session_id.clone(),
            "u1".into(),
        )
        .collect()
        .await;

        assert_eq!(events.len(), 4);
        let messages = store.get_session_messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hello!");
        assert_eq!(messages[0].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_upstream_error_stores_nothing() {
        let store = ChatDatabase::open_in_memory().unwrap().conversations();
        let session_id = session(&store).await;

        let events: Vec<_> = relay_fragments(
            fragments(vec![Ok("partial"), Err(UpstreamError::Failure("reset".into())), Ok("late")]),
            Arc::new(store.clone()),
            session_id.clone(),
            "u1".into(),
        )
        .collect()
        .await;

        // One content event, one error event, no [DONE].
        assert_eq!(events.len(), 2);
        assert!(store.get_session_messages(&session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_stream_stores_nothing() {
        let store = ChatDatabase::open_in_memory().unwrap().conversations();
        let session_id = session(&store).await;

        let mut events = Box::pin(relay_fragments(
            fragments(vec![Ok("a"), Ok("b"), Ok("c")]),
            Arc::new(store.clone()),
            session_id.clone(),
            "u1".into(),
        ));
        assert!(events.next().await.is_some());
        drop(events);

        assert!(store.get_session_messages(&session_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_completion_still_ends_with_done() {
        let store = ChatDatabase::open_in_memory().unwrap().conversations();
        let session_id = session(&store).await;

        let events: Vec<_> = relay_fragments(
            fragments(vec![]),
            Arc::new(store.clone()),
            session_id.clone(),
            "u1".into(),
        )
        .collect()
        .await;

        assert_eq!(events.len(), 1);
        assert!(store.get_session_messages(&session_id).await.unwrap().is_empty());
    }
}
