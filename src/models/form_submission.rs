use sea_orm::entity::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::{json, pk_auto, string, string_null, timestamp_with_time_zone};
use sea_orm_migration::sea_query::Expr;

/// Append-only record of agent disposition forms, kept for reporting.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "form_submissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    #[sea_orm(unique)]
    pub submission_id: String,
    pub disposition: String,
    pub contact_id: Option<String>,
    pub agent_name: Option<String>,
    pub payload: Json,
    pub created_at: DateTimeUtc,
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
                    .col(string(Column::SubmissionId).char_len(64).unique_key())
                    .col(string(Column::Disposition).char_len(32))
                    .col(string_null(Column::ContactId).char_len(64))
                    .col(string_null(Column::AgentName).char_len(160))
                    .col(json(Column::Payload))
                    .col(
                        timestamp_with_time_zone(Column::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_form_submissions_created_at")
                    .table(Entity)
                    .col(Column::CreatedAt)
                    .col(Column::Disposition)
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
