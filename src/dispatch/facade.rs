use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use super::requests::*;
use super::response::{ApiResponse, Pagination};
use crate::notifications::{
    NotificationLedger, NotificationQuery, NotificationStatus, TransitionResult,
};
use crate::push::{PushDispatcher, PushMessage};
use crate::server::metrics;
use crate::token_store::{FullTokenStore, Group};

const MAX_ID_LEN: usize = 100;
const MAX_NOTIFICATION_ID_LEN: usize = 200;
const MAX_TOKEN_LEN: usize = 4096;
const MAX_TITLE_LEN: usize = 500;
pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
    },

    #[error("Either id or token is required")]
    MissingTokenIdentifier,
}

#[derive(Debug, Error)]
enum FacadeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

type FacadeResult<T> = Result<ApiResponse<T>, FacadeError>;

fn require(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required(field));
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn in_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<u32, ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange { field, min, max });
    }
    Ok(value)
}

/// Collapses a facade result into the envelope, logging failures.
fn respond<T>(operation: &str, result: FacadeResult<T>) -> ApiResponse<T> {
    match result {
        Ok(response) => response,
        Err(FacadeError::Validation(err)) => {
            warn!("{}: invalid request: {}", operation, err);
            ApiResponse::failure(err.to_string())
        }
        Err(FacadeError::Internal(err)) => {
            error!("{} failed: {:#}", operation, err);
            ApiResponse::failure(err.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct FacadeSettings {
    pub default_days_back: u32,
}

/// Client-initiated operations over the token store, push dispatcher and ledger.
pub struct DispatchFacade {
    token_store: Arc<dyn FullTokenStore>,
    ledger: Arc<dyn NotificationLedger>,
    dispatcher: Option<Arc<PushDispatcher>>,
    settings: FacadeSettings,
}

impl DispatchFacade {
    pub fn new(
        token_store: Arc<dyn FullTokenStore>,
        ledger: Arc<dyn NotificationLedger>,
        dispatcher: Option<Arc<PushDispatcher>>,
        settings: FacadeSettings,
    ) -> Self {
        Self {
            token_store,
            ledger,
            dispatcher,
            settings,
        }
    }

    /// Pushes a notification to every device of a user in a system.
    pub async fn send_notification(
        &self,
        request: SendNotificationRequest,
    ) -> ApiResponse<SendNotificationData> {
        respond("send-notification", self.try_send_notification(request).await)
    }

    async fn try_send_notification(
        &self,
        request: SendNotificationRequest,
    ) -> FacadeResult<SendNotificationData> {
        require("userId", &request.user_id, MAX_ID_LEN)?;
        require("systemId", &request.system_id, MAX_ID_LEN)?;
        require("notification.title", &request.notification.title, MAX_TITLE_LEN)?;

        let user_id = request.user_id.as_str();
        let system_id = request.system_id.as_str();
        info!("Sending notification to user {} in system {}", user_id, system_id);

        let notification = self
            .ledger
            .create(user_id, system_id, &request.notification)?;
        let notification_id = notification.notification_id;
        let tokens = self.token_store.get_user_tokens(user_id, system_id)?;
        let total_tokens = tokens.len() as u32;
        let mut data = SendNotificationData {
            notification_id: notification_id.clone(),
            sent: 0,
            failed: 0,
            total_tokens,
        };

        if tokens.is_empty() {
            warn!("User {} has no tokens in system {}", user_id, system_id);
            self.ledger
                .transition_status(&notification_id, NotificationStatus::Failed, None)?;
            return Ok(ApiResponse::failure(
                "No active sessions found for the user in this system",
            )
            .with_data(data));
        }

        let Some(dispatcher) = &self.dispatcher else {
            warn!("Push delivery is disabled, cannot reach user {}", user_id);
            self.ledger
                .transition_status(&notification_id, NotificationStatus::Failed, None)?;
            return Ok(ApiResponse::failure("Push delivery is disabled").with_data(data));
        };

        let message = PushMessage::for_notification(&notification_id, &request.notification);
        let outcome = match dispatcher.send_to_many(&tokens, &message).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.ledger
                    .update_counts(&notification_id, total_tokens, 0, total_tokens)?;
                self.ledger
                    .transition_status(&notification_id, NotificationStatus::Failed, None)?;
                error!("Push for notification {} failed: {}", notification_id, err);
                return Ok(ApiResponse::failure(err.to_string()).with_data(data));
            }
        };

        self.ledger.update_counts(
            &notification_id,
            total_tokens,
            outcome.success_count,
            outcome.failure_count,
        )?;
        let delivered = outcome.success_count > 0;
        let new_status = if delivered {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        self.ledger
            .transition_status(&notification_id, new_status, None)?;

        if !outcome.failed_tokens.is_empty() {
            let removed = self
                .token_store
                .remove_invalid_tokens(&outcome.failed_tokens)?;
            metrics::record_tokens_pruned("push_failure", removed);
            info!("Pruned {} failed push tokens", removed);
        }

        data.sent = outcome.success_count;
        data.failed = outcome.failure_count;
        let message = format!(
            "Notification sent to {} of {} devices",
            outcome.success_count, total_tokens
        );
        info!("{}", message);

        let mut response = ApiResponse::ok_with_message(message, Some(data));
        response.status = delivered;
        Ok(response)
    }

    /// Upserts a push token registration.
    pub async fn register_token(&self, request: RegisterTokenRequest) -> ApiResponse<RegisteredToken> {
        respond("register-token", self.try_register_token(request))
    }

    fn try_register_token(&self, request: RegisterTokenRequest) -> FacadeResult<RegisteredToken> {
        require("userId", &request.user_id, MAX_ID_LEN)?;
        require("systemId", &request.system_id, MAX_ID_LEN)?;
        require("token", &request.token, MAX_TOKEN_LEN)?;

        let id = request.id.as_deref().filter(|id| !id.trim().is_empty());
        let saved = self.token_store.save_token(
            id,
            &request.user_id,
            &request.system_id,
            &request.token,
            request.device_info,
        )?;

        let action = if saved.is_new_registration {
            "registered"
        } else {
            "updated"
        };
        info!(
            "Token {} for user {} in system {}",
            action, request.user_id, request.system_id
        );
        Ok(ApiResponse::ok_with_message(
            format!("Token {} successfully", action),
            Some(RegisteredToken {
                token: saved.token,
                is_new_registration: saved.is_new_registration,
            }),
        ))
    }

    /// Deletes a registration by id, or else by token value. A missing
    /// registration is not an error.
    pub async fn unregister_token(&self, request: UnregisterTokenRequest) -> ApiResponse<()> {
        respond("unregister-token", self.try_unregister_token(request))
    }

    fn try_unregister_token(&self, request: UnregisterTokenRequest) -> FacadeResult<()> {
        let id = request.id.filter(|id| !id.trim().is_empty());
        let token = request.token.filter(|token| !token.trim().is_empty());

        let deleted = match (&id, &token) {
            (Some(id), _) => self.token_store.delete_token_by_id(id)?,
            (None, Some(token)) => self.token_store.delete_token(token)?,
            (None, None) => return Err(ValidationError::MissingTokenIdentifier.into()),
        };

        if deleted {
            info!("Token unregistered");
        } else {
            warn!("No token matched the unregister request");
        }
        Ok(ApiResponse::ok_with_message("Token removed successfully", None))
    }

    pub async fn update_notification_status(
        &self,
        request: UpdateStatusRequest,
    ) -> ApiResponse<StatusChangeData> {
        respond(
            "update-notification-status",
            self.try_update_notification_status(request),
        )
    }

    fn try_update_notification_status(
        &self,
        request: UpdateStatusRequest,
    ) -> FacadeResult<StatusChangeData> {
        require(
            "notificationId",
            &request.notification_id,
            MAX_NOTIFICATION_ID_LEN,
        )?;
        if let Some(metadata) = &request.metadata {
            if !metadata.is_object() {
                return Ok(ApiResponse::failure("metadata must be an object"));
            }
        }

        let result = self.ledger.transition_status(
            &request.notification_id,
            request.status,
            request.metadata,
        )?;
        match result {
            TransitionResult::Transitioned { previous_status } => {
                info!(
                    "Notification {} moved to {}",
                    request.notification_id, request.status
                );
                Ok(ApiResponse::ok_with_message(
                    "Status updated successfully",
                    Some(StatusChangeData {
                        notification_id: request.notification_id,
                        previous_status,
                        new_status: request.status,
                    }),
                ))
            }
            TransitionResult::NotFound => Ok(ApiResponse::failure("Notification not found")),
            TransitionResult::Rejected { current_status } => Ok(ApiResponse::failure(format!(
                "Cannot move notification from {} to {}",
                current_status, request.status
            ))),
        }
    }

    pub async fn get_user_notifications(
        &self,
        request: UserNotificationsRequest,
    ) -> ApiResponse<UserNotificationsData> {
        respond(
            "get-user-notifications",
            self.try_get_user_notifications(request),
        )
    }

    fn try_get_user_notifications(
        &self,
        request: UserNotificationsRequest,
    ) -> FacadeResult<UserNotificationsData> {
        require("userId", &request.user_id, MAX_ID_LEN)?;
        require("systemId", &request.system_id, MAX_ID_LEN)?;
        let page = in_range("page", request.page.unwrap_or(DEFAULT_PAGE), 1, u32::MAX)?;
        let limit = in_range("limit", request.limit.unwrap_or(DEFAULT_LIMIT), 1, MAX_LIMIT)?;
        let days_back = request.days_back.unwrap_or(self.settings.default_days_back);

        let result = self.ledger.list_for_user(&NotificationQuery {
            user_id: request.user_id.clone(),
            system_id: request.system_id.clone(),
            status: request.status,
            page,
            limit,
            days_back,
        })?;
        info!(
            "{} notifications for user {} (page {}, last {} days)",
            result.notifications.len(),
            request.user_id,
            page,
            days_back
        );

        let pagination = Pagination {
            total: result.total,
            page: result.page,
            limit: result.limit,
            total_pages: result.total_pages(),
        };
        Ok(ApiResponse::ok(UserNotificationsData {
            notifications: result.notifications,
        })
        .with_pagination(pagination))
    }

    pub async fn get_notification_history(&self, request: HistoryRequest) -> ApiResponse<HistoryData> {
        respond(
            "get-notification-history",
            self.try_get_notification_history(request),
        )
    }

    fn try_get_notification_history(&self, request: HistoryRequest) -> FacadeResult<HistoryData> {
        require(
            "notificationId",
            &request.notification_id,
            MAX_NOTIFICATION_ID_LEN,
        )?;
        let history = self.ledger.history(&request.notification_id)?;
        Ok(ApiResponse::ok(HistoryData {
            notification_id: request.notification_id,
            history,
        }))
    }

    pub async fn save_group(&self, request: SaveGroupRequest) -> ApiResponse<Group> {
        respond("save-group", self.try_save_group(request))
    }

    fn try_save_group(&self, request: SaveGroupRequest) -> FacadeResult<Group> {
        require("groupId", &request.group_id, MAX_ID_LEN)?;
        for user_id in &request.user_ids {
            require("userIds[]", user_id, MAX_ID_LEN)?;
        }
        let group = self.token_store.save_group(
            &request.group_id,
            &request.user_ids,
            request.name.as_deref(),
        )?;
        Ok(ApiResponse::ok_with_message("Group saved", Some(group)))
    }

    pub async fn add_group_member(&self, request: GroupMemberRequest) -> ApiResponse<Group> {
        respond("add-group-member", self.try_add_group_member(request))
    }

    fn try_add_group_member(&self, request: GroupMemberRequest) -> FacadeResult<Group> {
        require("groupId", &request.group_id, MAX_ID_LEN)?;
        require("userId", &request.user_id, MAX_ID_LEN)?;
        self.token_store
            .add_user_to_group(&request.group_id, &request.user_id)?;
        let group = self.token_store.get_group(&request.group_id)?;
        Ok(ApiResponse::ok_with_message("Member added", group))
    }

    pub async fn remove_group_member(&self, request: GroupMemberRequest) -> ApiResponse<Group> {
        respond("remove-group-member", self.try_remove_group_member(request))
    }

    fn try_remove_group_member(&self, request: GroupMemberRequest) -> FacadeResult<Group> {
        require("groupId", &request.group_id, MAX_ID_LEN)?;
        require("userId", &request.user_id, MAX_ID_LEN)?;
        let removed = self
            .token_store
            .remove_user_from_group(&request.group_id, &request.user_id)?;
        if !removed {
            warn!(
                "User {} is not a member of group {}",
                request.user_id, request.group_id
            );
            return Ok(ApiResponse::failure(format!(
                "User {} is not a member of group {}",
                request.user_id, request.group_id
            )));
        }
        let group = self.token_store.get_group(&request.group_id)?;
        Ok(ApiResponse::ok_with_message("Member removed", group))
    }
}
