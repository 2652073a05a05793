//! Tool dispatcher. Each call is one transaction: gate on `confirm`, validate,
//! resolve the identity, then a single gateway call.
//!
//! Mutating tools never act on the first call. `plan.publish` and
//! `plan.delete` answer `need_confirm` until the caller resends with
//! `confirm: true`; `plan.update` degrades to a dry run instead.
//!
//! The `session.*` tools touch only the in-process session identity and
//! never reach the gateway.

use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use stas_core::athlete::{
    DateRange, LastTrainingRequest, LastTrainingResponse, SessionClearResponse,
    SessionUserRequest, SessionUserResponse, SummaryRequest, SummaryResponse, user_id_text,
};
use stas_core::etag::payload_etag;
use stas_core::external_id::{PLAN_PREFIX, normalize_external_id, status_window};
use stas_core::plan::{
    DeleteRequest, DeleteResponse, ListRequest, ListResponse, NeedConfirmResponse, Plan,
    PlanSummary, PublishRequest, PublishResponse, StatusRequest, StatusResponse, UpdateRequest,
    UpdateResponse, ValidationResult, draft_from_validate_body,
};
use stas_core::validate::{diff, validate};

use crate::error::AppError;
use crate::extract::map_json_error;
use crate::gateway::{Gateway, PlanUpdate, training_date};
use crate::identity::{IdentityError, IdentityResolver, ResolvedIdentity};
use crate::resources::{LAST_TRAINING_WINDOW_DAYS, most_recent};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Validate,
    Publish,
    Delete,
    Update,
    Status,
    List,
    SummaryFetch,
    LastTrainingFetch,
    SessionSetUser,
    SessionGetUser,
    SessionClearUser,
}

impl Tool {
    /// Manifest order.
    pub const ALL: [Tool; 11] = [
        Tool::Validate,
        Tool::Publish,
        Tool::Delete,
        Tool::Update,
        Tool::Status,
        Tool::List,
        Tool::SummaryFetch,
        Tool::LastTrainingFetch,
        Tool::SessionSetUser,
        Tool::SessionGetUser,
        Tool::SessionClearUser,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Validate => "plan.validate",
            Tool::Publish => "plan.publish",
            Tool::Delete => "plan.delete",
            Tool::Update => "plan.update",
            Tool::Status => "plan.status",
            Tool::List => "plan.list",
            Tool::SummaryFetch => "user.summary.fetch",
            Tool::LastTrainingFetch => "user.last_training.fetch",
            Tool::SessionSetUser => "session.set_user_id",
            Tool::SessionGetUser => "session.get_user_id",
            Tool::SessionClearUser => "session.clear_user_id",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn path(self) -> String {
        format!("/mcp/tool/{}", self.name())
    }
}

/// Result of a confirm-gated tool: either the gate response or the outcome.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Gate<T> {
    NeedConfirm(NeedConfirmResponse),
    Done(T),
}

#[derive(Clone)]
pub struct ToolDispatcher {
    gateway: Arc<dyn Gateway>,
    identity: IdentityResolver,
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, AppError> {
    let args = if args.is_null() {
        Value::Object(Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|err| map_json_error(&err))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::Internal(format!("response encoding: {e}")))
}

fn required_external_id(raw: Option<&str>) -> Result<String, AppError> {
    match raw.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(AppError::validation(
            "external_id is required",
            "external_id",
        )),
    }
}

fn parse_date(raw: Option<&str>, field: &str) -> Result<Option<NaiveDate>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::Validation {
            message: format!("{field} must be an ISO date (YYYY-MM-DD)"),
            field: Some(field.to_string()),
            received: Some(Value::String(raw.to_string())),
            docs_hint: None,
        })
}

/// Optional `user_id` argument: integer or non-blank string.
fn requested_user_id(raw: Option<&Value>) -> Result<Option<String>, AppError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => user_id_text(value).map(Some).ok_or_else(|| AppError::Validation {
            message: "user_id must be an integer or a non-empty string".to_string(),
            field: Some("user_id".to_string()),
            received: Some(value.clone()),
            docs_hint: None,
        }),
    }
}

fn parse_cursor(raw: Option<&str>) -> Result<usize, AppError> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(0),
        Some(raw) => raw.parse::<usize>().map_err(|_| AppError::Validation {
            message: "cursor is not valid; pass the next_cursor of a previous page".to_string(),
            field: Some("cursor".to_string()),
            received: Some(Value::String(raw.to_string())),
            docs_hint: None,
        }),
    }
}

impl ToolDispatcher {
    pub fn new(gateway: Arc<dyn Gateway>, identity: IdentityResolver) -> Self {
        Self { gateway, identity }
    }

    /// Run a tool from raw JSON arguments. Used by both HTTP tool routes and
    /// the JSON-RPC adapter.
    pub async fn call(
        &self,
        tool: Tool,
        args: Value,
        connection_id: Option<String>,
    ) -> Result<Value, AppError> {
        match tool {
            Tool::Validate => {
                let body_connection = args
                    .get("connection_id")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string);
                let connection_id = connection_id.or(body_connection);
                let result = self.validate(args, connection_id.as_deref()).await;
                to_value(&result)
            }
            Tool::Publish => {
                let mut req: PublishRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.publish(req).await?)
            }
            Tool::Delete => {
                let mut req: DeleteRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.delete(req).await?)
            }
            Tool::Update => {
                let mut req: UpdateRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.update(req).await?)
            }
            Tool::Status => {
                let mut req: StatusRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.status(req).await?)
            }
            Tool::List => {
                let mut req: ListRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.list(req).await?)
            }
            Tool::SummaryFetch => {
                let mut req: SummaryRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.summary(req).await?)
            }
            Tool::LastTrainingFetch => {
                let mut req: LastTrainingRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.last_training(req).await?)
            }
            Tool::SessionSetUser => {
                let mut req: SessionUserRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.set_session_user(req)?)
            }
            Tool::SessionGetUser => {
                let mut req: SessionUserRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                to_value(&self.session_user(req).await?)
            }
            Tool::SessionClearUser => {
                let mut req: SessionUserRequest = parse_args(args)?;
                req.connection_id = connection_id.or(req.connection_id);
                let cleared = self
                    .identity
                    .clear_session_user(req.connection_id.as_deref());
                tracing::info!(event = "session_user_cleared", cleared, "session identity cleared");
                to_value(&SessionClearResponse { ok: true, cleared })
            }
        }
    }

    /// Resolve the caller and refuse reads that name a different user.
    async fn resolve_reader(
        &self,
        user_id: Option<&Value>,
        connection_id: Option<&str>,
    ) -> Result<ResolvedIdentity, AppError> {
        let requested = requested_user_id(user_id)?;
        let identity = self.identity.resolve(connection_id).await?;
        if let Some(requested) = requested {
            if requested != identity.user_id {
                tracing::warn!(
                    event = "read_user_mismatch",
                    source = ?identity.source,
                    "user_id differs from resolved identity"
                );
                return Err(AppError::Forbidden(format!(
                    "user_id {requested} is not the identity of this connection"
                )));
            }
        }
        Ok(identity)
    }

    pub async fn summary(&self, req: SummaryRequest) -> Result<SummaryResponse, AppError> {
        let identity = self
            .resolve_reader(req.user_id.as_ref(), req.connection_id.as_deref())
            .await?;
        let summary = self.gateway.get_summary(&identity.user_id).await?;
        tracing::debug!(event = "summary_fetched", "summary fetched");
        Ok(SummaryResponse { ok: true, summary })
    }

    /// Latest dated training in `oldest..=newest`. Entries the gateway
    /// returns past `newest` are never picked.
    pub async fn last_training(
        &self,
        req: LastTrainingRequest,
    ) -> Result<LastTrainingResponse, AppError> {
        let newest =
            parse_date(req.newest.as_deref(), "newest")?.unwrap_or_else(|| Utc::now().date_naive());
        let oldest = match parse_date(req.oldest.as_deref(), "oldest")? {
            Some(oldest) => oldest,
            None => newest
                .checked_sub_days(Days::new(LAST_TRAINING_WINDOW_DAYS))
                .unwrap_or(newest),
        };
        if oldest > newest {
            return Err(AppError::validation(
                "oldest must not be after newest",
                "oldest",
            ));
        }

        let identity = self
            .resolve_reader(req.user_id.as_ref(), req.connection_id.as_deref())
            .await?;
        let trainings = self
            .gateway
            .get_trainings(&identity.user_id, oldest, newest)
            .await?;
        let count = trainings.len();
        let finished: Vec<Value> = trainings
            .into_iter()
            .filter(|t| training_date(t).is_some_and(|day| day <= newest))
            .collect();

        tracing::debug!(event = "last_training_fetched", count, "trainings read");
        Ok(LastTrainingResponse {
            ok: true,
            last: most_recent(finished),
            count,
            range: DateRange { oldest, newest },
        })
    }

    pub fn set_session_user(&self, req: SessionUserRequest) -> Result<SessionUserResponse, AppError> {
        let user_id = requested_user_id(req.user_id.as_ref())?
            .ok_or_else(|| AppError::validation("user_id is required", "user_id"))?;
        self.identity
            .set_session_user(req.connection_id.as_deref(), &user_id)?;
        Ok(SessionUserResponse {
            ok: true,
            user_id: Some(user_id),
            effective_user_id: None,
        })
    }

    pub async fn session_user(
        &self,
        req: SessionUserRequest,
    ) -> Result<SessionUserResponse, AppError> {
        let connection_id = req.connection_id.as_deref();
        let effective = match self.identity.resolve(connection_id).await {
            Ok(identity) => Some(identity.user_id),
            Err(IdentityError::Unlinked { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        Ok(SessionUserResponse {
            ok: true,
            user_id: self.identity.session_user(connection_id),
            effective_user_id: effective,
        })
    }

    /// Pure validation. The diff against a published version is best effort:
    /// an unlinked caller or an unreachable gateway just leaves it empty.
    pub async fn validate(&self, body: Value, connection_id: Option<&str>) -> ValidationResult {
        let draft = draft_from_validate_body(body);
        let mut result = validate(&draft);

        let Some(external_id) = draft.get("external_id").and_then(Value::as_str) else {
            return result;
        };
        let external_id = normalize_external_id(external_id);
        let identity = match self.identity.resolve(connection_id).await {
            Ok(identity) => identity,
            Err(IdentityError::Unlinked { .. }) => return result,
            Err(err) => {
                tracing::warn!(event = "validate_identity_failed", error = %err, "skipping diff");
                return result;
            }
        };
        match self.gateway.get_plan(&identity.user_id, &external_id).await {
            Ok(Some(prior)) => result.diff = diff(&prior.payload, &draft),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    event = "validate_prior_lookup_failed",
                    external_id = %external_id,
                    error = %err,
                    "skipping diff"
                );
            }
        }
        tracing::debug!(
            event = "plan_validated",
            external_id = %external_id,
            ok = result.ok,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "draft validated"
        );
        result
    }

    pub async fn publish(&self, req: PublishRequest) -> Result<Gate<PublishResponse>, AppError> {
        if !req.confirmed() {
            tracing::info!(event = "publish_needs_confirm", "publish held for confirmation");
            return Ok(Gate::NeedConfirm(NeedConfirmResponse::default()));
        }

        let draft_id = req
            .draft
            .get("external_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let outer_id = req
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        if let (Some(outer), Some(inner)) = (&outer_id, &draft_id) {
            if normalize_external_id(outer) != normalize_external_id(inner) {
                return Err(AppError::Validation {
                    message: format!(
                        "external_id '{outer}' does not match draft.external_id '{inner}'"
                    ),
                    field: Some("external_id".to_string()),
                    received: Some(Value::String(outer.clone())),
                    docs_hint: Some("Send the same external_id in the body and the draft.".to_string()),
                });
            }
        }

        let result = validate(&req.draft);
        if !result.ok {
            tracing::info!(
                event = "publish_rejected",
                errors = result.errors.len(),
                "draft failed validation; nothing written"
            );
            return Err(AppError::ValidationFailed(result));
        }

        let echoed_id = outer_id.or(draft_id).unwrap_or_default();
        let mut plan = Plan::from_draft(&req.draft).map_err(|err| {
            AppError::ValidationFailed(ValidationResult::from_findings(
                vec![format!("draft does not match the plan schema: {err}")],
                result.warnings.clone(),
            ))
        })?;
        plan.external_id = normalize_external_id(&echoed_id);

        let identity = self.identity.resolve(req.connection_id.as_deref()).await?;
        let outcome = self
            .gateway
            .write_plan(&identity.user_id, &plan, PLAN_PREFIX)
            .await?;

        tracing::info!(
            event = "plan_published",
            external_id = %plan.external_id,
            days_written = outcome.days_written,
            "plan published"
        );
        Ok(Gate::Done(PublishResponse {
            ok: true,
            external_id: echoed_id,
            status: "published".to_string(),
            days_written: outcome.days_written,
        }))
    }

    pub async fn delete(&self, req: DeleteRequest) -> Result<Gate<DeleteResponse>, AppError> {
        if !req.confirmed() {
            tracing::info!(event = "delete_needs_confirm", "delete held for confirmation");
            return Ok(Gate::NeedConfirm(NeedConfirmResponse::default()));
        }
        let external_id = required_external_id(req.external_id.as_deref())?;
        let identity = self.identity.resolve(req.connection_id.as_deref()).await?;
        let normalized = normalize_external_id(&external_id);
        self.gateway
            .delete_plan(&identity.user_id, &normalized)
            .await?;

        tracing::info!(event = "plan_deleted", external_id = %normalized, "plan deleted");
        Ok(Gate::Done(DeleteResponse {
            ok: true,
            external_id,
        }))
    }

    pub async fn update(&self, req: UpdateRequest) -> Result<UpdateResponse, AppError> {
        let dry_run = !req.confirmed();
        let external_id = required_external_id(req.external_id.as_deref())?;
        if !req.patch.is_object() {
            return Err(AppError::validation("patch must be an object", "patch"));
        }
        let identity = self.identity.resolve(req.connection_id.as_deref()).await?;
        let normalized = normalize_external_id(&external_id);

        let update = PlanUpdate {
            external_id: normalized.clone(),
            patch: req.patch,
            dry_run,
            if_match: req
                .if_match
                .map(|etag| etag.trim().to_string())
                .filter(|etag| !etag.is_empty()),
        };
        let response = self.gateway.update_plan(&identity.user_id, &update).await?;

        if dry_run {
            tracing::debug!(event = "plan_update_preview", external_id = %normalized, "update previewed");
            return Ok(UpdateResponse::Preview {
                ok: true,
                external_id,
                external_id_normalized: normalized,
                would_change: response
                    .get("would_change")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                diff: response.get("diff").cloned().unwrap_or_else(|| json!({})),
            });
        }

        tracing::info!(event = "plan_updated", external_id = %normalized, "plan updated");
        Ok(UpdateResponse::Applied {
            ok: true,
            external_id,
            external_id_normalized: normalized,
            updated: response
                .get("updated")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            etag: response
                .get("etag")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub async fn status(&self, req: StatusRequest) -> Result<StatusResponse, AppError> {
        let external_id = required_external_id(req.external_id.as_deref())?;
        let identity = self.identity.resolve(req.connection_id.as_deref()).await?;
        let normalized = normalize_external_id(&external_id);

        let response = match self.gateway.get_plan(&identity.user_id, &normalized).await? {
            Some(record) => StatusResponse {
                ok: true,
                external_id,
                status: record.status.clone(),
                etag: payload_etag(&record.payload),
                updated_at: record.updated_at,
            },
            None => StatusResponse {
                ok: true,
                external_id,
                status: "missing".to_string(),
                etag: None,
                updated_at: None,
            },
        };
        Ok(response)
    }

    pub async fn list(&self, req: ListRequest) -> Result<ListResponse, AppError> {
        let limit = match req.limit {
            None => DEFAULT_LIST_LIMIT,
            Some(limit) if limit < 1 => {
                return Err(AppError::Validation {
                    message: "limit must be at least 1".to_string(),
                    field: Some("limit".to_string()),
                    received: Some(json!(limit)),
                    docs_hint: None,
                });
            }
            Some(limit) => limit.min(MAX_LIST_LIMIT),
        };
        let limit = usize::try_from(limit).unwrap_or(DEFAULT_LIST_LIMIT as usize);
        let offset = parse_cursor(req.cursor.as_deref())?;

        let (default_from, default_to) = status_window("", Utc::now().date_naive());
        let date_from = parse_date(req.date_from.as_deref(), "date_from")?.unwrap_or(default_from);
        let date_to = parse_date(req.date_to.as_deref(), "date_to")?.unwrap_or(default_to);
        if date_from > date_to {
            return Err(AppError::validation(
                "date_from must not be after date_to",
                "date_from",
            ));
        }

        let identity = self.identity.resolve(req.connection_id.as_deref()).await?;
        let mut records = self
            .gateway
            .list_plans(&identity.user_id, date_from, date_to)
            .await?;

        let athlete = req
            .athlete_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());
        if let Some(athlete) = athlete {
            records.retain(|r| r.athlete_id.as_deref() == Some(athlete));
        }
        records.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });

        let total = records.len();
        let items: Vec<PlanSummary> = records
            .iter()
            .skip(offset)
            .take(limit)
            .map(PlanSummary::from)
            .collect();
        let next = offset + items.len();
        let next_cursor = (next < total).then(|| next.to_string());

        tracing::debug!(
            event = "plans_listed",
            count = items.len(),
            total,
            "plans listed"
        );
        Ok(ListResponse {
            ok: true,
            items,
            next_cursor,
        })
    }
}
