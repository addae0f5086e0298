//! Subscription HTTP routes.
//!
//! Client operations answer with the [`ApiResponse`] envelope and HTTP 200,
//! including malformed bodies. Webhook handlers answer a plain `OK`/`ERROR`
//! string, also with HTTP 200, so that upstream sources do not redeliver.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::dispatch::*;
use crate::server::state::{GuardedDispatchFacade, GuardedWebhookIngestor, ServerState};

/// JSON body whose rejection is rendered as a failed [`ApiResponse`].
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => {
                let reason = rejection.body_text();
                warn!("Rejected request body: {}", reason);
                Err(ApiResponse::<()>::failure(reason).into_response())
            }
        }
    }
}

// =============================================================================
// Client operations
// =============================================================================

async fn send_notification(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<SendNotificationRequest>,
) -> impl IntoResponse {
    facade.send_notification(request).await
}

async fn register_token(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<RegisterTokenRequest>,
) -> impl IntoResponse {
    facade.register_token(request).await
}

async fn unregister_token(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<UnregisterTokenRequest>,
) -> impl IntoResponse {
    facade.unregister_token(request).await
}

async fn update_notification_status(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<UpdateStatusRequest>,
) -> impl IntoResponse {
    facade.update_notification_status(request).await
}

async fn get_user_notifications(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<UserNotificationsRequest>,
) -> impl IntoResponse {
    facade.get_user_notifications(request).await
}

async fn get_notification_history(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<HistoryRequest>,
) -> impl IntoResponse {
    facade.get_notification_history(request).await
}

async fn save_group(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<SaveGroupRequest>,
) -> impl IntoResponse {
    facade.save_group(request).await
}

async fn add_group_member(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<GroupMemberRequest>,
) -> impl IntoResponse {
    facade.add_group_member(request).await
}

async fn remove_group_member(
    State(facade): State<GuardedDispatchFacade>,
    JsonBody(request): JsonBody<GroupMemberRequest>,
) -> impl IntoResponse {
    facade.remove_group_member(request).await
}

// =============================================================================
// Webhooks
// =============================================================================

async fn subscription_handler(
    State(ingestor): State<GuardedWebhookIngestor>,
    body: Bytes,
) -> impl IntoResponse {
    debug!("Webhook envelope of {} bytes", body.len());
    let outcome = ingestor.ingest_envelope(&body).await;
    (StatusCode::OK, outcome.ack())
}

async fn subscription_handler_plain(
    State(ingestor): State<GuardedWebhookIngestor>,
    body: Bytes,
) -> impl IntoResponse {
    debug!("Plain webhook of {} bytes", body.len());
    let outcome = ingestor.ingest_plain(&body).await;
    (StatusCode::OK, outcome.ack())
}

/// Build the subscription routes.
///
/// - POST /subscription-handler - Pub/Sub push envelope
/// - POST /subscription-handler-plain - flat JSON event
/// - POST /send-notification, /register-token, /unregister-token
/// - POST /update-notification-status, /get-user-notifications,
///   /get-notification-history
/// - POST /save-group, /add-group-member, /remove-group-member
pub fn subscription_routes() -> Router<ServerState> {
    let webhook_routes = Router::new()
        .route("/subscription-handler", post(subscription_handler))
        .route("/subscription-handler-plain", post(subscription_handler_plain));

    let token_routes = Router::new()
        .route("/register-token", post(register_token))
        .route("/unregister-token", post(unregister_token));

    let notification_routes = Router::new()
        .route("/send-notification", post(send_notification))
        .route("/update-notification-status", post(update_notification_status))
        .route("/get-user-notifications", post(get_user_notifications))
        .route("/get-notification-history", post(get_notification_history));

    let group_routes = Router::new()
        .route("/save-group", post(save_group))
        .route("/add-group-member", post(add_group_member))
        .route("/remove-group-member", post(remove_group_member));

    webhook_routes
        .merge(token_routes)
        .merge(notification_routes)
        .merge(group_routes)
}
