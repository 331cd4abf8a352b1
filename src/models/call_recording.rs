use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{
    integer, pk_auto, string, string_null, text_null, timestamp_with_time_zone,
    timestamp_with_time_zone_null,
};
use sea_orm_migration::sea_query::Expr;

/// One row per call whose recording is tracked for backup.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "call_recordings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    #[sea_orm(unique)]
    pub call_id: String,
    pub contact_id: Option<String>,
    pub engagement_id: Option<String>,
    pub agent_name: Option<String>,
    pub disposition: Option<String>,
    pub phone: Option<String>,
    pub call_started_at: Option<DateTimeUtc>,
    pub source_url: Option<String>,
    pub backup_status: String,
    pub backup_attempts: i32,
    pub storage_file_id: Option<String>,
    pub storage_url: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .if_not_exists()
                    .col(pk_auto(Column::Id))
                    .col(string(Column::CallId).char_len(120))
                    .col(string_null(Column::ContactId).char_len(64))
                    .col(string_null(Column::EngagementId).char_len(64))
                    .col(string_null(Column::AgentName).char_len(160))
                    .col(string_null(Column::Disposition).char_len(32))
                    .col(string_null(Column::Phone).char_len(64))
                    .col(timestamp_with_time_zone_null(Column::CallStartedAt))
                    .col(text_null(Column::SourceUrl))
                    .col(
                        string(Column::BackupStatus)
                            .char_len(32)
                            .default("pending"),
                    )
                    .col(integer(Column::BackupAttempts).not_null().default(0))
                    .col(string_null(Column::StorageFileId).char_len(255))
                    .col(text_null(Column::StorageUrl))
                    .col(text_null(Column::LastError))
                    .col(
                        timestamp_with_time_zone(Column::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Column::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_call_recordings_call_id")
                    .table(Entity)
                    .col(Column::CallId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_call_recordings_status")
                    .table(Entity)
                    .col(Column::BackupStatus)
                    .col(Column::CreatedAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Entity).to_owned())
            .await
    }
}
