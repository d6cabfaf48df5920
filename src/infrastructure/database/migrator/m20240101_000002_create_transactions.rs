//! Create transactions table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Transactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transactions::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transactions::SerialNumber)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transactions::ConnectorId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transactions::CredentialRef).string())
                    .col(ColumnDef::new(Transactions::StartMeter).big_integer())
                    .col(
                        ColumnDef::new(Transactions::StartMeterInferred)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Transactions::StartTimestamp).timestamp_with_time_zone())
                    .col(ColumnDef::new(Transactions::StopMeter).big_integer())
                    .col(ColumnDef::new(Transactions::StopTimestamp).timestamp_with_time_zone())
                    .col(ColumnDef::new(Transactions::StopReason).string())
                    .col(
                        ColumnDef::new(Transactions::Status)
                            .string()
                            .not_null()
                            .default("Active"),
                    )
                    .col(
                        ColumnDef::new(Transactions::Placeholder)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .to_owned(),
            )
            .await?;

        // Active transaction lookups by station and connector
        manager
            .create_index(
                Index::create()
                    .name("idx_transactions_station_status")
                    .table(Transactions::Table)
                    .col(Transactions::SerialNumber)
                    .col(Transactions::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_transactions_credential")
                    .table(Transactions::Table)
                    .col(Transactions::CredentialRef)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Transactions::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Transactions {
    Table,
    Id,
    SerialNumber,
    ConnectorId,
    CredentialRef,
    StartMeter,
    StartMeterInferred,
    StartTimestamp,
    StopMeter,
    StopTimestamp,
    StopReason,
    Status,
    Placeholder,
}
