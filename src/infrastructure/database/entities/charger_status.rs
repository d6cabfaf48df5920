//! Last known status per charger identity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "charger_statuses")]
pub struct Model {
    /// `<serial>` or `<serial>#<connector>`
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    pub serial_number: String,
    pub connector_id: i32,

    #[sea_orm(nullable)]
    pub last_status: Option<String>,

    #[sea_orm(nullable)]
    pub last_error_code: Option<String>,

    /// JSON object with boot details and vendor fields
    pub vendor_info: Json,

    pub timestamp: DateTimeUtc,

    /// Operative, Inoperative, Unknown
    pub availability: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
