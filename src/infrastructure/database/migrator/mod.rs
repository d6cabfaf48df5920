//! Database migrations module

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_charger_statuses;
mod m20240101_000002_create_transactions;
mod m20240101_000003_create_meter_values;
mod m20240101_000004_create_pending_calls;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_charger_statuses::Migration),
            Box::new(m20240101_000002_create_transactions::Migration),
            Box::new(m20240101_000003_create_meter_values::Migration),
            Box::new(m20240101_000004_create_pending_calls::Migration),
        ]
    }
}
