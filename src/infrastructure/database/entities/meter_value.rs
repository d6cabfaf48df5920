//! Sampled meter values

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "meter_values")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Absent for samples reported outside a transaction
    #[sea_orm(nullable)]
    pub transaction_id: Option<i32>,

    pub serial_number: String,
    pub connector_id: i32,
    pub timestamp: DateTimeUtc,
    pub measurand: String,

    /// Raw value string as reported
    pub value: String,

    #[sea_orm(nullable)]
    pub context: Option<String>,

    #[sea_orm(nullable)]
    pub unit: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::transaction::Entity",
        from = "Column::TransactionId",
        to = "super::transaction::Column::Id"
    )]
    Transaction,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
