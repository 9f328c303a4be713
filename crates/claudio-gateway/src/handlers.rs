use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use claudio_core::ChatQueueKey;
use tracing::{info, warn};

use crate::alexa_session::AlexaOutcome;
use crate::state::GatewayState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

fn too_large() -> Response {
    (StatusCode::PAYLOAD_TOO_LARGE, "body too large").into_response()
}

fn shutting_down_response() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
}

pub async fn telegram_webhook(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    if state.dispatcher.is_shutting_down() {
        return shutting_down_response();
    }
    if body.len() > MAX_BODY_BYTES {
        return too_large();
    }

    let secret = headers
        .get("x-telegram-bot-api-secret-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let Some(bot) = state.registry.find_by_secret(secret) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let Some(built) = state.bot_by_id(&bot.bot_id) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return StatusCode::OK.into_response();
    };
    let Some(msg) = crate::parse::telegram::parse(&parsed) else {
        return StatusCode::OK.into_response();
    };

    if let Some(tg) = &bot.telegram {
        if msg.chat_id != tg.chat_id {
            warn!(bot_id = %bot.bot_id, "telegram update addressed a chat other than the configured one");
            return StatusCode::OK.into_response();
        }
    }

    if state.dispatcher.seen_update(msg.update_id) {
        return StatusCode::OK.into_response();
    }

    dispatch_parsed(&state, &built.bot_id, msg);
    StatusCode::OK.into_response()
}

pub async fn whatsapp_webhook(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    if state.dispatcher.is_shutting_down() {
        return shutting_down_response();
    }
    if body.len() > MAX_BODY_BYTES {
        return too_large();
    }

    let signature = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()).unwrap_or("");
    let matched = state
        .whatsapp_bots()
        .into_iter()
        .find(|b| {
            let Some(registry_bot) = state.registry.get(&b.bot_id) else { return false };
            registry_bot
                .whatsapp
                .as_ref()
                .is_some_and(|wa| claudio_platform::auth::verify_hmac_sha256(&wa.app_secret, &body, signature))
        });
    let Some(built) = matched else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return StatusCode::OK.into_response();
    };
    let Some(msg) = crate::parse::whatsapp::parse(&parsed) else {
        return StatusCode::OK.into_response();
    };

    if state.dispatcher.seen_update(msg.update_id) {
        return StatusCode::OK.into_response();
    }

    dispatch_parsed(&state, &built.bot_id, msg);
    StatusCode::OK.into_response()
}

pub async fn alexa_webhook(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Response {
    if state.dispatcher.is_shutting_down() {
        return shutting_down_response();
    }
    if body.len() > MAX_BODY_BYTES {
        return too_large();
    }

    let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let Some(built) = state.alexa_target_bot() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no bot configured to receive Alexa messages").into_response();
    };

    let timestamp = parsed["request"]["timestamp"].as_str().unwrap_or_default();
    let cert_url = headers.get("signaturecertchainurl").and_then(|v| v.to_str().ok()).unwrap_or("");
    let signature = headers.get("signature").and_then(|v| v.to_str().ok()).unwrap_or("");

    if let Err(err) = state.alexa_verifier.verify(&body, cert_url, signature, timestamp).await {
        warn!(error = %err, "alexa request verification failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let (Some(chat_id), Some(sender_id)) = (built.telegram_chat_id.clone(), built.ctx.authorized_sender_id.clone()) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "target bot has no telegram chat configured").into_response();
    };

    match state.alexa_sessions.handle(&parsed, &chat_id, &sender_id) {
        AlexaOutcome::Respond(envelope) => Json(envelope).into_response(),
        AlexaOutcome::RespondAndDispatch(envelope, msg) => {
            dispatch_parsed(&state, &built.bot_id, msg);
            Json(envelope).into_response()
        }
    }
}

fn dispatch_parsed(state: &GatewayState, bot_id: &str, msg: claudio_core::ParsedMessage) {
    let dispatcher = state.dispatcher.clone();
    state.media_groups.add(
        bot_id.to_string(),
        msg,
        Arc::new(move |bot_id, merged| {
            let key = ChatQueueKey::new(bot_id, merged.chat_id.clone());
            dispatcher.enqueue(key, merged);
        }),
    );
}

pub async fn health(State(state): State<GatewayState>) -> Response {
    if state.dispatcher.is_shutting_down() {
        return shutting_down_response();
    }
    Json(serde_json::json!({"status": "ok", "bots": state.registry.len()})).into_response()
}

pub async fn reload(State(state): State<GatewayState>) -> Response {
    match state.rebuild_bots() {
        Ok(()) => {
            info!(bots = state.registry.len(), "bot registry reloaded");
            Json(serde_json::json!({"status": "reloaded", "bots": state.registry.len()})).into_response()
        }
        Err(err) => {
            warn!(error = %err, "bot reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
