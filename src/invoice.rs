//! The structured invoice record produced by extraction (or supplied by a
//! user edit).
//!
//! [`ExtractedInvoice`] is a plain serde value type with every field the
//! vision model is asked to read off the page. All invoice-level fields are
//! independently nullable — real invoices omit things, and the extraction
//! prompt forbids guessing — while line items require the four fields an
//! order detail row cannot exist without. The record is immutable once
//! produced: a user-submitted edit replaces the whole value, never patches
//! part of it.

use serde::{Deserialize, Serialize};

use crate::error::Doc2OrderError;

/// One line of the invoice's item table.
///
/// `item_number` is the only optional field; a row without a description,
/// quantity, unit price, or line total is not a line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub item_number: Option<String>,
    pub description: String,
    pub qty: f64,
    pub unit_price: f64,
    pub line_total: f64,
}

/// Structured data extracted from one invoice document.
///
/// Monetary fields are independently nullable and the core performs no
/// cross-validation between them (subtotal + tax need not equal total_due);
/// the record reports what the page says, warnings included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    // Identifying fields
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub purchase_order_number: Option<String>,
    /// ISO date string, e.g. "2024-03-01" or a full datetime.
    #[serde(default)]
    pub order_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub ship_date: Option<String>,
    #[serde(default)]
    pub salesperson: Option<String>,
    #[serde(default)]
    pub ship_via: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,

    // Monetary fields
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub tax_rate: Option<f64>,
    #[serde(default)]
    pub tax_amt: Option<f64>,
    #[serde(default)]
    pub freight: Option<f64>,
    #[serde(default)]
    pub total_due: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,

    // Parties
    #[serde(default)]
    pub bill_to_name: Option<String>,
    #[serde(default)]
    pub ship_to_name: Option<String>,

    #[serde(default)]
    pub items: Vec<LineItem>,

    /// Model self-reported confidence; range is whatever the model chose.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ExtractedInvoice {
    /// Validate a caller-supplied JSON payload into an invoice record.
    ///
    /// This is the gate the save operation runs edited payloads through: a
    /// missing or mistyped required field (line `description`, `qty`,
    /// `unit_price`, `line_total`) rejects the whole payload with a
    /// [`Doc2OrderError::Validation`] naming the offender, and the document
    /// is left untouched.
    pub fn from_value(payload: serde_json::Value) -> Result<Self, Doc2OrderError> {
        serde_json::from_value(payload).map_err(|e| Doc2OrderError::Validation {
            detail: e.to_string(),
        })
    }

    /// Parse an invoice record from a raw JSON string (the provider reply or
    /// a stored `extracted_json` column).
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
