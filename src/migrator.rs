//! Embedded schema migrations.
//!
//! Kept in-crate so tests and single-node deployments can bring a fresh
//! database (including in-memory sqlite) up to date without an external
//! migration binary.

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_tenant_tables::Migration),
            Box::new(m20240601_000002_create_orders_tables::Migration),
            Box::new(m20240601_000003_create_invoices_tables::Migration),
            Box::new(m20240601_000004_create_sequence_counters::Migration),
        ]
    }
}

mod m20240601_000001_create_tenant_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_tenant_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Companies::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Companies::Id)
                                .big_integer()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Companies::Name).string().not_null())
                        .col(
                            ColumnDef::new(Companies::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Companies::UpdatedAt).timestamp_with_time_zone())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::CompanyId).big_integer().not_null())
                        .col(ColumnDef::new(Customers::Name).string().not_null())
                        .col(ColumnDef::new(Customers::Email).string())
                        .col(
                            ColumnDef::new(Customers::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Customers::CreatedBy).uuid())
                        .col(ColumnDef::new(Customers::UpdatedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(Customers::UpdatedBy).uuid())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_customers_company")
                        .table(Customers::Table)
                        .col(Customers::CompanyId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::CompanyId).big_integer().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(
                            ColumnDef::new(Products::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::StockQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::Status).string().not_null())
                        .col(
                            ColumnDef::new(Products::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Products::CreatedBy).uuid())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(Products::UpdatedBy).uuid())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_products_company")
                        .table(Products::Table)
                        .col(Products::CompanyId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BankDetails::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BankDetails::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(BankDetails::CompanyId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BankDetails::BankName).string().not_null())
                        .col(ColumnDef::new(BankDetails::Iban).string().not_null())
                        .col(
                            ColumnDef::new(BankDetails::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(BankDetails::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BankDetails::CreatedBy).uuid())
                        .col(ColumnDef::new(BankDetails::UpdatedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(BankDetails::UpdatedBy).uuid())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_bank_details_company")
                        .table(BankDetails::Table)
                        .col(BankDetails::CompanyId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BankDetails::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Companies::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Companies {
        Table,
        Id,
        Name,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Customers {
        Table,
        Id,
        CompanyId,
        Name,
        Email,
        IsDeleted,
        CreatedAt,
        CreatedBy,
        UpdatedAt,
        UpdatedBy,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        CompanyId,
        Name,
        Sku,
        UnitPrice,
        StockQuantity,
        Status,
        IsDeleted,
        CreatedAt,
        CreatedBy,
        UpdatedAt,
        UpdatedBy,
    }

    #[derive(DeriveIden)]
    enum BankDetails {
        Table,
        Id,
        CompanyId,
        BankName,
        Iban,
        IsDeleted,
        CreatedAt,
        CreatedBy,
        UpdatedAt,
        UpdatedBy,
    }
}

mod m20240601_000002_create_orders_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::CompanyId).big_integer().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(
                            ColumnDef::new(Orders::OrderDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::DueDate).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Orders::SubTotal)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::TaxRate).decimal_len(8, 4).not_null())
                        .col(
                            ColumnDef::new(Orders::TaxAmount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Orders::Notes).text())
                        .col(
                            ColumnDef::new(Orders::StockDeducted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::CreatedBy).uuid())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(Orders::UpdatedBy).uuid())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("uq_orders_company_number")
                        .table(Orders::Table)
                        .col(Orders::CompanyId)
                        .col(Orders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_company_customer")
                        .table(Orders::Table)
                        .col(Orders::CompanyId)
                        .col(Orders::CustomerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::Total)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::UpdatedAt).timestamp_with_time_zone())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_order_items_order")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        CompanyId,
        CustomerId,
        OrderNumber,
        OrderDate,
        DueDate,
        SubTotal,
        TaxRate,
        TaxAmount,
        ShippingCost,
        Total,
        Currency,
        Status,
        Notes,
        StockDeducted,
        Version,
        IsDeleted,
        CreatedAt,
        CreatedBy,
        UpdatedAt,
        UpdatedBy,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        UnitPrice,
        Total,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_invoices_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_invoices_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Invoices::CompanyId).big_integer().not_null())
                        .col(ColumnDef::new(Invoices::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::OrderId).uuid())
                        .col(ColumnDef::new(Invoices::BankDetailId).uuid())
                        .col(ColumnDef::new(Invoices::InvoiceNumber).string().not_null())
                        .col(
                            ColumnDef::new(Invoices::InvoiceDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::DueDate).timestamp_with_time_zone())
                        .col(
                            ColumnDef::new(Invoices::SubTotal)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::TaxRate)
                                .decimal_len(8, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::TaxAmount)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::ShippingCost)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::Total).decimal_len(12, 2).not_null())
                        .col(ColumnDef::new(Invoices::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Invoices::Status).string_len(16).not_null())
                        .col(ColumnDef::new(Invoices::PaidDate).timestamp_with_time_zone())
                        .col(ColumnDef::new(Invoices::Notes).text())
                        .col(
                            ColumnDef::new(Invoices::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Invoices::IsDeleted)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Invoices::CreatedBy).uuid())
                        .col(ColumnDef::new(Invoices::UpdatedAt).timestamp_with_time_zone())
                        .col(ColumnDef::new(Invoices::UpdatedBy).uuid())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("uq_invoices_company_number")
                        .table(Invoices::Table)
                        .col(Invoices::CompanyId)
                        .col(Invoices::InvoiceNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            // One invoice per order. Null order ids (free-standing
            // invoices) don't collide under either backend.
            manager
                .create_index(
                    Index::create()
                        .name("uq_invoices_order")
                        .table(Invoices::Table)
                        .col(Invoices::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InvoiceItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InvoiceItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceItems::InvoiceId).uuid().not_null())
                        .col(ColumnDef::new(InvoiceItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InvoiceItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(InvoiceItems::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::TaxRate)
                                .decimal_len(8, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::Total)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InvoiceItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InvoiceItems::UpdatedAt).timestamp_with_time_zone())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoice_items_invoice")
                                .from(InvoiceItems::Table, InvoiceItems::InvoiceId)
                                .to(Invoices::Table, Invoices::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_invoice_items_invoice")
                        .table(InvoiceItems::Table)
                        .col(InvoiceItems::InvoiceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InvoiceItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        CompanyId,
        CustomerId,
        OrderId,
        BankDetailId,
        InvoiceNumber,
        InvoiceDate,
        DueDate,
        SubTotal,
        TaxRate,
        TaxAmount,
        ShippingCost,
        Total,
        Currency,
        Status,
        PaidDate,
        Notes,
        Version,
        IsDeleted,
        CreatedAt,
        CreatedBy,
        UpdatedAt,
        UpdatedBy,
    }

    #[derive(DeriveIden)]
    enum InvoiceItems {
        Table,
        Id,
        InvoiceId,
        ProductId,
        Quantity,
        UnitPrice,
        TaxRate,
        Total,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_sequence_counters {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_sequence_counters"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(SequenceCounters::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(SequenceCounters::CompanyId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SequenceCounters::Series)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(SequenceCounters::Value)
                                .big_integer()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(SequenceCounters::CompanyId)
                                .col(SequenceCounters::Series),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SequenceCounters::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum SequenceCounters {
        Table,
        CompanyId,
        Series,
        Value,
    }
}
