//! System prompt for vision-LLM invoice extraction.
//!
//! Centralising the prompt here keeps a single source of truth and lets unit
//! tests inspect it without calling a real model. Callers can override it via
//! [`crate::config::PipelineConfig::system_prompt`]; the constant is used only
//! when no override is provided.

/// Default system prompt for extracting structured invoice data from a page
/// image. The field list mirrors [`crate::invoice::ExtractedInvoice`] — keep
/// the two in sync when adding fields.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert data extraction assistant. Your task is to read a sales invoice image and return its contents as JSON.

Follow these rules precisely:

1. OUTPUT FORMAT
   - Return ONLY a single JSON object, no markdown fences, no commentary
   - Use null for any field not present on the document
   - Do not guess or hallucinate values

2. FIELDS
   {
     "invoice_number": string|null,
     "purchase_order_number": string|null,
     "order_date": "YYYY-MM-DD"|null,
     "due_date": "YYYY-MM-DD"|null,
     "ship_date": "YYYY-MM-DD"|null,
     "salesperson": string|null,
     "ship_via": string|null,
     "terms": string|null,
     "subtotal": number|null,
     "tax_rate": number|null,
     "tax_amt": number|null,
     "freight": number|null,
     "total_due": number|null,
     "currency": string|null,
     "bill_to_name": string|null,
     "ship_to_name": string|null,
     "items": [
       {"item_number": string|null, "description": string, "qty": number,
        "unit_price": number, "line_total": number}
     ],
     "confidence": number|null,
     "warnings": [string]
   }

3. LINE ITEMS
   - One entry per row of the item table, in document order
   - description, qty, unit_price and line_total are required per row;
     skip decorative rows that have no amounts

4. AMOUNTS
   - Plain numbers only: no currency symbols, no thousands separators
   - Report the currency code separately in "currency" if visible

5. UNCERTAINTY
   - Put anything ambiguous or unreadable into "warnings"
   - Set "confidence" between 0 and 1 for the extraction overall"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_required_line_field() {
        for field in ["description", "qty", "unit_price", "line_total"] {
            assert!(
                DEFAULT_SYSTEM_PROMPT.contains(field),
                "prompt must mention {field}"
            );
        }
    }

    #[test]
    fn prompt_forbids_fences_and_guessing() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("no markdown fences"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("Do not guess"));
    }
}
