use sea_orm_migration::{MigrationTrait, MigratorTrait};
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(super::webhook_log::Migration),
            Box::new(super::call_recording::Migration),
            Box::new(super::form_submission::Migration),
        ]
    }
}
