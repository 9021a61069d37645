//! Tenant-scoped sequence allocation.
//!
//! Every order and invoice number comes from a strictly increasing counter
//! per (company, series), advanced by a compare-and-swap retry loop. The
//! loop is linearizable: an update only lands when the row still holds the
//! value we read, so no two callers can ever claim the same number, and a
//! failed swap implies another caller succeeded.

use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, SqlErr};
use tracing::instrument;

use crate::entities::sequence_counter::{self, Entity as SequenceCounter};
use crate::errors::ServiceError;

/// Number series the allocator serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Series {
    Order,
    Invoice,
}

impl Series {
    pub fn as_str(self) -> &'static str {
        match self {
            Series::Order => "order",
            Series::Invoice => "invoice",
        }
    }

    /// Renders a sequence number into the display identifier.
    ///
    /// The invoice format leaves the company id unpadded while the order
    /// format zero-pads it to four digits. The asymmetry is deliberate:
    /// both strings are already persisted and user-visible, so they must
    /// be reproduced byte for byte.
    pub fn format(self, company_id: i64, sequence: i64) -> String {
        match self {
            Series::Order => format!("ORD-{company_id:04}-{sequence:06}"),
            Series::Invoice => format!("INV-{company_id}-{sequence:06}"),
        }
    }
}

pub struct SequenceAllocator;

impl SequenceAllocator {
    /// Claims the next number in the series for the tenant.
    ///
    /// Runs on the caller's connection or transaction so the claim commits
    /// (or rolls back) together with the entity that consumes it.
    #[instrument(skip(conn))]
    pub async fn next<C: ConnectionTrait>(
        conn: &C,
        company_id: i64,
        series: Series,
    ) -> Result<i64, ServiceError> {
        loop {
            let current = SequenceCounter::find_by_id((company_id, series.as_str().to_owned()))
                .one(conn)
                .await?;

            match current {
                Some(row) => {
                    let claimed = row.value + 1;
                    let swapped = SequenceCounter::update_many()
                        .col_expr(sequence_counter::Column::Value, Expr::value(claimed))
                        .filter(sequence_counter::Column::CompanyId.eq(company_id))
                        .filter(sequence_counter::Column::Series.eq(series.as_str()))
                        .filter(sequence_counter::Column::Value.eq(row.value))
                        .exec(conn)
                        .await?;
                    if swapped.rows_affected == 1 {
                        return Ok(claimed);
                    }
                    // Lost the swap; reread and try again.
                }
                None => {
                    let seed = sequence_counter::ActiveModel {
                        company_id: Set(company_id),
                        series: Set(series.as_str().to_owned()),
                        value: Set(1),
                    };
                    match seed.insert(conn).await {
                        Ok(_) => return Ok(1),
                        Err(err) => match err.sql_err() {
                            // Another caller seeded the row first.
                            Some(SqlErr::UniqueConstraintViolation(_)) => {}
                            _ => return Err(err.into()),
                        },
                    }
                }
            }
        }
    }

    /// Claims the next number and renders its display identifier.
    pub async fn next_display<C: ConnectionTrait>(
        conn: &C,
        company_id: i64,
        series: Series,
    ) -> Result<(i64, String), ServiceError> {
        let sequence = Self::next(conn, company_id, series).await?;
        Ok((sequence, series.format(company_id, sequence)))
    }
}
