//! SeaORM implementation of PendingCallStore
//!
//! Terminal transitions are a conditional UPDATE on `status = 'Pending'`, so
//! concurrent writers across processes still see first-write-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value;

use crate::domain::pending_call::{PendingCall, PendingCallStatus, PendingCallStore};
use crate::domain::{ChargerIdentity, DomainError, DomainResult};
use crate::infrastructure::database::entities::pending_call;

pub struct SeaOrmPendingCallStore {
    db: DatabaseConnection,
}

impl SeaOrmPendingCallStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_domain(m: pending_call::Model) -> DomainResult<PendingCall> {
    let identity = ChargerIdentity::from_key(&m.charger_key).ok_or_else(|| {
        DomainError::Validation(format!("invalid charger key {}", m.charger_key))
    })?;
    let status: PendingCallStatus = m.status.parse()?;
    Ok(PendingCall {
        message_id: m.message_id,
        identity,
        action: m.action,
        request_payload: m.request_payload,
        sent_at: m.sent_at,
        timeout_at: m.timeout_at,
        status,
        result_payload: m.result_payload,
        error_payload: m.error_payload,
        resolved_at: m.resolved_at,
    })
}

#[async_trait]
impl PendingCallStore for SeaOrmPendingCallStore {
    async fn upsert(&self, call: &PendingCall) -> DomainResult<()> {
        let model = pending_call::ActiveModel {
            message_id: Set(call.message_id.clone()),
            charger_key: Set(call.identity.key()),
            action: Set(call.action.clone()),
            request_payload: Set(call.request_payload.clone()),
            sent_at: Set(call.sent_at),
            timeout_at: Set(call.timeout_at),
            status: Set(call.status.as_str().to_string()),
            result_payload: Set(call.result_payload.clone()),
            error_payload: Set(call.error_payload.clone()),
            resolved_at: Set(call.resolved_at),
        };
        pending_call::Entity::insert(model)
            .on_conflict(
                OnConflict::column(pending_call::Column::MessageId)
                    .update_columns([
                        pending_call::Column::Status,
                        pending_call::Column::ResultPayload,
                        pending_call::Column::ErrorPayload,
                        pending_call::Column::ResolvedAt,
                        pending_call::Column::TimeoutAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn get(&self, message_id: &str) -> DomainResult<Option<PendingCall>> {
        pending_call::Entity::find_by_id(message_id.to_string())
            .one(&self.db)
            .await?
            .map(model_to_domain)
            .transpose()
    }

    async fn delete(&self, message_id: &str) -> DomainResult<()> {
        pending_call::Entity::delete_by_id(message_id.to_string())
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn list_pending(&self) -> DomainResult<Vec<PendingCall>> {
        pending_call::Entity::find()
            .filter(pending_call::Column::Status.eq(PendingCallStatus::Pending.as_str()))
            .order_by_asc(pending_call::Column::SentAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(model_to_domain)
            .collect()
    }

    async fn finish_if_pending(
        &self,
        message_id: &str,
        status: PendingCallStatus,
        result: Option<Value>,
        error: Option<Value>,
        at: DateTime<Utc>,
    ) -> DomainResult<Option<PendingCall>> {
        if !status.is_terminal() {
            return Ok(None);
        }
        let updated = pending_call::Entity::update_many()
            .col_expr(pending_call::Column::Status, Expr::value(status.as_str()))
            .col_expr(pending_call::Column::ResultPayload, Expr::value(result))
            .col_expr(pending_call::Column::ErrorPayload, Expr::value(error))
            .col_expr(pending_call::Column::ResolvedAt, Expr::value(at))
            .filter(pending_call::Column::MessageId.eq(message_id))
            .filter(pending_call::Column::Status.eq(PendingCallStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        if updated.rows_affected == 0 {
            return Ok(None);
        }
        self.get(message_id).await
    }
}
