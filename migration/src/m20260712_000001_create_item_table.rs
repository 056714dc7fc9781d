use sea_orm_migration::prelude::*;

/// Creates the single `item` table backing the session state store.
///
/// One flat collection addressed by a (partition key, sort key) pair, with
/// all record attributes held in one JSON column. Session meta records,
/// player records, and connection mapping records all live here.
#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum Item {
    Table,
    Pk,
    Sk,
    Attrs,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Item::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Item::Pk).string_len(64).not_null())
                    .col(ColumnDef::new(Item::Sk).string_len(64).not_null())
                    .col(ColumnDef::new(Item::Attrs).json_binary().not_null())
                    .primary_key(Index::create().col(Item::Pk).col(Item::Sk))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Item::Table).to_owned())
            .await
    }
}
