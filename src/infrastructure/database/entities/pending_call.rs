//! Mirror of CSMS-initiated calls awaiting a reply

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pending_calls")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub message_id: String,

    /// Charger identity key the call was sent to
    pub charger_key: String,

    pub action: String,
    pub request_payload: Json,
    pub sent_at: DateTimeUtc,
    pub timeout_at: DateTimeUtc,

    /// Pending, Completed, Failed, TimedOut
    pub status: String,

    #[sea_orm(nullable)]
    pub result_payload: Option<Json>,

    #[sea_orm(nullable)]
    pub error_payload: Option<Json>,

    #[sea_orm(nullable)]
    pub resolved_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
