//! Transaction entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Assigned by the engine, or taken from a station for placeholders
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    pub serial_number: String,
    pub connector_id: i32,

    #[sea_orm(nullable)]
    pub credential_ref: Option<String>,

    /// Wh
    #[sea_orm(nullable)]
    pub start_meter: Option<i64>,

    pub start_meter_inferred: bool,

    #[sea_orm(nullable)]
    pub start_timestamp: Option<DateTimeUtc>,

    /// Wh
    #[sea_orm(nullable)]
    pub stop_meter: Option<i64>,

    #[sea_orm(nullable)]
    pub stop_timestamp: Option<DateTimeUtc>,

    #[sea_orm(nullable)]
    pub stop_reason: Option<String>,

    /// Active, Stopped
    pub status: String,

    pub placeholder: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::meter_value::Entity")]
    MeterValues,
}

impl Related<super::meter_value::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MeterValues.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
