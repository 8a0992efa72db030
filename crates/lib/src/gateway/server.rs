//! Gateway HTTP server: liveness probe and the WeChat callback endpoint.

use crate::config::Config;
use crate::context::BotContext;
use crate::dispatch;
use crate::wechat::{CallbackQuery, InboundMessage, MessageCrypto};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

/// Body WeChat expects when there is nothing to say.
const NO_REPLY_BODY: &str = "success";

/// Shared state for request handlers (read-only config and collaborators).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub ctx: BotContext,
    /// Set when `encoding_aes_key` is configured.
    pub crypto: Option<Arc<MessageCrypto>>,
}

impl GatewayState {
    pub fn new(config: Config, ctx: BotContext) -> Result<Self> {
        let crypto = config.message_crypto()?.map(Arc::new);
        Ok(Self {
            config: Arc::new(config),
            ctx,
            crypto,
        })
    }
}

/// Build the router. Split out so callers can supply their own collaborators.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/debug", get(health_http))
        .route("/api/wechat", any(wechat_callback))
        .with_state(state)
}

/// Run the gateway with real upstream clients until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    let ctx = BotContext::from_config(&config)?;
    serve(config, ctx).await
}

/// Bind `config.addr` and serve with the given collaborators until shutdown.
pub async fn serve(config: Config, ctx: BotContext) -> Result<()> {
    let bind_addr = config.bind_addr();
    let state = GatewayState::new(config, ctx)?;
    if state.crypto.is_some() {
        log::info!("encoding_aes_key is set; encrypted callbacks will be decrypted");
    }
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining in-flight callbacks");
}

/// GET /debug returns a fixed acknowledgement (for probes).
async fn health_http() -> Json<serde_json::Value> {
    Json(json!({ "msg": "wechat-bot run ok" }))
}

/// ANY /api/wechat: URL verification handshake and message delivery.
///
/// Rejected or unparseable callbacks are logged and answered with an empty 200. No retry.
async fn wechat_callback(
    State(state): State<GatewayState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    let query = match query {
        Ok(Query(q)) => q,
        Err(e) => {
            log::warn!("wechat callback with unreadable query: {}", e.body_text());
            return empty();
        }
    };
    let token = &state.config.wechat.token;
    if let Err(e) = query.verify(token) {
        log::warn!("wechat callback rejected: {}", e);
        return empty();
    }
    if let Some(echostr) = &query.echostr {
        log::info!("wechat url verification handshake");
        return echostr.clone().into_response();
    }
    let body = match std::str::from_utf8(&body) {
        Ok(b) => b,
        Err(e) => {
            log::warn!("wechat callback body is not utf-8: {}", e);
            return empty();
        }
    };

    // Compatible mode also carries the plaintext fields, so without a key they are read directly.
    let crypto = match (query.is_encrypted(), state.crypto.as_deref()) {
        (true, Some(crypto)) => Some(crypto),
        (true, None) => {
            log::debug!("encrypted callback but no encoding_aes_key; reading plaintext fields");
            None
        }
        (false, _) => None,
    };
    let xml = match crypto {
        Some(crypto) => {
            let signature = query.msg_signature.as_deref().unwrap_or_default();
            match crypto.open(token, &query.timestamp, &query.nonce, signature, body) {
                Ok(xml) => xml,
                Err(e) => {
                    log::warn!("wechat encrypted callback rejected: {}", e);
                    return empty();
                }
            }
        }
        None => body.to_string(),
    };
    let msg = match InboundMessage::from_xml(&xml) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("wechat callback: {}", e);
            return empty();
        }
    };
    if query.is_encrypted() && crypto.is_none() && msg.msg_type.as_str().is_empty() {
        log::warn!("safe-mode callback without plaintext fields; set wechat.encoding_aes_key");
        return empty();
    }
    log::debug!(
        "wechat callback: type={} from={}",
        msg.msg_type.as_str(),
        msg.from_user_name
    );

    let Some(reply) = dispatch::dispatch(&state.ctx, &msg).await else {
        return NO_REPLY_BODY.into_response();
    };
    let now = chrono::Utc::now().timestamp();
    let xml = match reply.to_xml(&msg, now) {
        Ok(xml) => xml,
        Err(e) => {
            log::warn!("wechat reply not sent: {}", e);
            return empty();
        }
    };
    let xml = match crypto {
        Some(crypto) => match crypto.seal(token, now, &query.nonce, &xml) {
            Ok(sealed) => sealed,
            Err(e) => {
                log::warn!("wechat reply not sent: {}", e);
                return empty();
            }
        },
        None => xml,
    };
    ([(header::CONTENT_TYPE, "application/xml; charset=utf-8")], xml).into_response()
}

fn empty() -> Response {
    ().into_response()
}
