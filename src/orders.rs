//! The sales-order aggregate: one header plus its owned detail rows,
//! created exactly once per confirmed invoice.
//!
//! ## Atomicity
//!
//! Header and details commit inside a single transaction. A failure at any
//! point before commit rolls the whole aggregate back — there is never an
//! order header without its details visible, nor orphaned details. After
//! creation the core never mutates an order; a correction means a new
//! document/extraction cycle, not an update-in-place.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Doc2OrderError;
use crate::invoice::ExtractedInvoice;

/// Status code stamped on every order this pipeline creates: the order is
/// complete the moment the operator confirms the extraction.
const ORDER_STATUS_COMPLETED: i64 = 5;

/// Revision of a freshly created order.
const FIRST_REVISION: i64 = 1;

/// Invoice-level fields of a committed order.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderHeader {
    pub id: i64,
    pub revision_number: Option<i64>,
    pub order_date: Option<NaiveDateTime>,
    pub due_date: Option<NaiveDateTime>,
    pub ship_date: Option<NaiveDateTime>,
    pub status: Option<i64>,
    pub online_order_flag: Option<bool>,
    pub sales_order_number: Option<String>,
    pub purchase_order_number: Option<String>,
    pub sub_total: Option<f64>,
    pub tax_amt: Option<f64>,
    pub freight: Option<f64>,
    pub total_due: Option<f64>,
}

/// One committed line of an order, referencing its header by id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderDetail {
    pub id: i64,
    pub sales_order_id: i64,
    pub order_qty: i64,
    pub unit_price: f64,
    pub unit_price_discount: Option<f64>,
    pub line_total: f64,
}

/// A full aggregate as returned by [`OrderWriter::get_order`].
#[derive(Debug, Clone, Serialize)]
pub struct SalesOrder {
    pub header: OrderHeader,
    pub details: Vec<OrderDetail>,
}

/// Creates and reads order aggregates over an injected pool.
#[derive(Clone)]
pub struct OrderWriter {
    pool: SqlitePool,
}

impl OrderWriter {
    pub fn new(pool: SqlitePool) -> Self {
        OrderWriter { pool }
    }

    /// Commit one header and one detail row per line item, atomically, and
    /// return the new header id.
    ///
    /// Unset invoice fields become NULL columns; quantities are coerced to
    /// whole units; the line discount defaults to zero (the extraction
    /// record carries no discount). Date strings that parse neither as ISO
    /// datetime nor as `YYYY-MM-DD` become NULL rather than failing the
    /// save.
    pub async fn create_order(&self, extracted: &ExtractedInvoice) -> Result<i64, Doc2OrderError> {
        let mut tx = self.pool.begin().await?;

        let order_id: i64 = sqlx::query_scalar(
            "INSERT INTO sales_order_header \
             (revision_number, order_date, due_date, ship_date, status, online_order_flag, \
              sales_order_number, purchase_order_number, sub_total, tax_amt, freight, total_due) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(FIRST_REVISION)
        .bind(parse_order_date(extracted.order_date.as_deref()))
        .bind(parse_order_date(extracted.due_date.as_deref()))
        .bind(parse_order_date(extracted.ship_date.as_deref()))
        .bind(ORDER_STATUS_COMPLETED)
        .bind(false)
        .bind(extracted.invoice_number.as_deref())
        .bind(extracted.purchase_order_number.as_deref())
        .bind(extracted.subtotal)
        .bind(extracted.tax_amt)
        .bind(extracted.freight)
        .bind(extracted.total_due)
        .fetch_one(&mut *tx)
        .await?;

        for item in &extracted.items {
            sqlx::query(
                "INSERT INTO sales_order_detail \
                 (sales_order_id, order_qty, unit_price, unit_price_discount, line_total) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(item.qty as i64)
            .bind(item.unit_price)
            .bind(0.0_f64)
            .bind(item.line_total)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            order_id,
            lines = extracted.items.len(),
            number = extracted.invoice_number.as_deref().unwrap_or("-"),
            "sales order committed"
        );
        Ok(order_id)
    }

    /// Newest-first header summaries.
    pub async fn list_orders(&self, limit: i64) -> Result<Vec<OrderHeader>, Doc2OrderError> {
        let rows = sqlx::query_as::<_, OrderHeader>(
            "SELECT * FROM sales_order_header ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Load one aggregate; unknown ids are a typed not-found error.
    pub async fn get_order(&self, id: i64) -> Result<SalesOrder, Doc2OrderError> {
        let header =
            sqlx::query_as::<_, OrderHeader>("SELECT * FROM sales_order_header WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(Doc2OrderError::NotFound { what: "order", id })?;

        let details = sqlx::query_as::<_, OrderDetail>(
            "SELECT * FROM sales_order_detail WHERE sales_order_id = ? ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(SalesOrder { header, details })
    }
}

/// Lenient order-date parsing: ISO datetime (trailing `Z` tolerated) or bare
/// `YYYY-MM-DD`; anything else is treated as absent.
fn parse_order_date(value: Option<&str>) -> Option<NaiveDateTime> {
    let s = value?.trim().trim_end_matches('Z');
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight is valid"))
        })
}
