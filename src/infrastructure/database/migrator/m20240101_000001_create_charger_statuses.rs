//! Create charger_statuses table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChargerStatuses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChargerStatuses::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChargerStatuses::SerialNumber)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargerStatuses::ConnectorId)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ChargerStatuses::LastStatus).string())
                    .col(ColumnDef::new(ChargerStatuses::LastErrorCode).string())
                    .col(ColumnDef::new(ChargerStatuses::VendorInfo).json().not_null())
                    .col(
                        ColumnDef::new(ChargerStatuses::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargerStatuses::Availability)
                            .string()
                            .not_null()
                            .default("Unknown"),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_charger_statuses_serial")
                    .table(ChargerStatuses::Table)
                    .col(ChargerStatuses::SerialNumber)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChargerStatuses::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ChargerStatuses {
    Table,
    Key,
    SerialNumber,
    ConnectorId,
    LastStatus,
    LastErrorCode,
    VendorInfo,
    Timestamp,
    Availability,
}
