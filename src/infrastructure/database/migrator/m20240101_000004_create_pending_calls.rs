//! Create pending_calls table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PendingCalls::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PendingCalls::MessageId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PendingCalls::ChargerKey).string().not_null())
                    .col(ColumnDef::new(PendingCalls::Action).string().not_null())
                    .col(ColumnDef::new(PendingCalls::RequestPayload).json().not_null())
                    .col(
                        ColumnDef::new(PendingCalls::SentAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingCalls::TimeoutAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PendingCalls::Status)
                            .string()
                            .not_null()
                            .default("Pending"),
                    )
                    .col(ColumnDef::new(PendingCalls::ResultPayload).json())
                    .col(ColumnDef::new(PendingCalls::ErrorPayload).json())
                    .col(ColumnDef::new(PendingCalls::ResolvedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pending_calls_status")
                    .table(PendingCalls::Table)
                    .col(PendingCalls::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PendingCalls::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum PendingCalls {
    Table,
    MessageId,
    ChargerKey,
    Action,
    RequestPayload,
    SentAt,
    TimeoutAt,
    Status,
    ResultPayload,
    ErrorPayload,
    ResolvedAt,
}
