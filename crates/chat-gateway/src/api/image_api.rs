//! Image generation endpoint.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Extension, Json};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::Identity;
use crate::chat_db::{ConversationStore, MessageRole, NewMessage};
use crate::error::ApiError;
use crate::shared_state::AppState;
use crate::utils::TextUtils;
use crate::validation::{parse_body, validate, ImagePromptInput};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub image_url: String,
    pub prompt: String,
    pub enhanced_prompt: String,
}

/// POST /api/image
pub async fn generate_image(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<Json<ImageResponse>, ApiError> {
    state.counters.inc_total_requests();
    state.rate_limiters.image.enforce(&identity.user_id)?;
    let input = validate::<ImagePromptInput>(&parse_body(&body)).into_result()?;

    let backend = state
        .images
        .clone()
        .ok_or_else(ApiError::upstream_not_configured)?;

    let image = backend
        .generate(&input.prompt)
        .await
        .map_err(|e| ApiError::from_upstream(e, "Failed to generate image"))?;

    state.counters.inc_generated_images();
    info!("Generated image for user {}", identity.user_id);

    tokio::spawn(record_image_round(
        Arc::clone(&state.conversations),
        identity.user_id,
        input.prompt.clone(),
        image.url.clone(),
    ));

    Ok(Json(ImageResponse {
        image_url: image.url,
        prompt: input.prompt,
        enhanced_prompt: image.enhanced_prompt,
    }))
}

/// Store the prompt and resulting image as a chat session. Failures are
/// logged only.
pub async fn record_image_round(
    store: Arc<dyn ConversationStore>,
    user_id: String,
    prompt: String,
    image_url: String,
) {
    let session_id = match store
        .create_session(&TextUtils::derive_title(&prompt), Some(&user_id))
        .await
    {
        Ok(id) => id,
        Err(e) => {
            warn!("Failed to record image session: {:#}", e);
            return;
        }
    };

    let turns = [
        NewMessage::text(&session_id, MessageRole::User, &prompt, Some(&user_id)),
        NewMessage::image(&session_id, &image_url, Some(&user_id)),
    ];
    for turn in turns {
        if let Err(e) = store.append_message(turn).await {
            warn!("Failed to record image turn for session {}: {:#}", session_id, e);
            return;
        }
    }
    debug!("Recorded image round in session {}", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat_db::{ChatDatabase, MessageKind};

    #[tokio::test]
    async fn test_image_round_is_recorded() {
        let store = ChatDatabase::open_in_memory().unwrap().conversations();
        record_image_round(
            Arc::new(store.clone()),
            "u1".into(),
            "a red fox".into(),
            "https://img.example.com/fox.png".into(),
        )
        .await;

        let sessions = store.list_sessions_for_user("u1").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "a red fox");

        let messages = store.get_session_messages(&sessions[0].id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "a red fox");
        assert_eq!(messages[1].kind, MessageKind::Image);
    }
}
