//! The fixed extraction prompt, field catalogue and output grammar.

use handlebars::{Handlebars, no_escape};
use serde_json::json;

use crate::prelude::*;

/// A field we ask the model to find.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct FieldSpec {
    pub key: &'static str,
    pub description: &'static str,
}

/// Every field we ask for, in prompt order.
pub static FIELD_CATALOGUE: &[FieldSpec] = &[
    FieldSpec { key: "vendor_name", description: "name of the company that issued the invoice" },
    FieldSpec { key: "vendor_address", description: "postal address of the issuer" },
    FieldSpec { key: "customer_name", description: "name of the invoice recipient" },
    FieldSpec { key: "customer_number", description: "customer number assigned by the issuer" },
    FieldSpec { key: "invoice_id", description: "invoice number" },
    FieldSpec { key: "invoice_date", description: "date the invoice was issued" },
    FieldSpec { key: "due_date", description: "date payment is due" },
    FieldSpec { key: "delivery_date", description: "delivery or service date" },
    FieldSpec { key: "order_number", description: "purchase order or order reference" },
    FieldSpec { key: "currency", description: "ISO 4217 currency code" },
    FieldSpec { key: "net_amount", description: "total before tax" },
    FieldSpec { key: "tax_rate", description: "VAT rate, e.g. 19%" },
    FieldSpec { key: "tax_amount", description: "total VAT amount" },
    FieldSpec { key: "total_amount", description: "gross total including tax" },
    FieldSpec { key: "vat_id", description: "VAT identification number (USt-IdNr.)" },
    FieldSpec { key: "tax_number", description: "tax number (Steuernummer)" },
    FieldSpec { key: "iban", description: "IBAN of the issuer's bank account" },
    FieldSpec { key: "bic", description: "BIC/SWIFT code of the issuer's bank" },
    FieldSpec { key: "bank_name", description: "name of the issuer's bank" },
    FieldSpec { key: "payment_terms", description: "payment terms, e.g. discounts or deadlines" },
    FieldSpec {
        key: "line_items",
        description: "array of objects with description, quantity, unit_price and amount",
    },
];

static PROMPT_TEMPLATE: &str = "\
The following text was read by OCR from a scanned invoice. Find the fields \
listed below and answer with a single JSON object using exactly these keys. \
Use null for any field that does not appear in the text. Copy values as they \
are written; do not translate or reformat them.

Fields:
{{#each fields}}
- {{key}}: {{description}}
{{/each}}

Invoice text:
{{text}}

JSON:
";

/// GBNF grammar limiting completions to a single JSON object.
pub static JSON_GRAMMAR: &str = r#"root   ::= object
value  ::= object | array | string | number | ("true" | "false" | "null") ws

object ::=
  "{" ws (
            string ":" ws value
    ("," ws string ":" ws value)*
  )? "}" ws

array  ::=
  "[" ws (
            value
    ("," ws value)*
  )? "]" ws

string ::=
  "\"" (
    [^"\\\x7F\x00-\x1F] |
    "\\" (["\\bfnrt] | "u" [0-9a-fA-F]{4})
  )* "\"" ws

number ::= ("-"? ([0-9] | [1-9] [0-9]{0,15})) ("." [0-9]+)? ([eE] [-+]? [0-9] [1-9]{0,15})? ws

ws ::= | " " | "\n" [ \t]{0,20}
"#;

/// Build the extraction prompt for some OCR text.
pub fn build_prompt(text: &str) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(no_escape);
    handlebars
        .render_template(
            PROMPT_TEMPLATE,
            &json!({ "fields": FIELD_CATALOGUE, "text": text }),
        )
        .context("failed to render extraction prompt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_field_and_the_text() {
        let prompt = build_prompt("Rechnung Nr. 4711 <Muster & Co.>").unwrap();
        for field in FIELD_CATALOGUE {
            assert!(
                prompt.contains(&format!("- {}: {}", field.key, field.description)),
                "missing {}",
                field.key
            );
        }
        // OCR text goes in unescaped.
        assert!(prompt.contains("Rechnung Nr. 4711 <Muster & Co.>"));
        assert!(prompt.ends_with("JSON:\n"));
    }

    #[test]
    fn catalogue_keys_are_unique() {
        let mut keys = FIELD_CATALOGUE.iter().map(|f| f.key).collect::<Vec<_>>();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), FIELD_CATALOGUE.len());
    }

    #[test]
    fn grammar_starts_with_an_object() {
        assert!(JSON_GRAMMAR.starts_with("root   ::= object"));
    }
}
