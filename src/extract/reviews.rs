//! Product reviews from embedded structured data
//!
//! Retailer product pages carry a JSON-LD product object in
//! `<script id="product_structured_data">`. Its `review` list becomes one
//! record per review. A page without the payload yields no records.

use crate::extract::record::{synthetic_id, FieldValue, Record};
use scraper::{Html, Selector};
use serde_json::Value;

/// Entity name of review output files
pub const REVIEWS_ENTITY: &str = "reviews";

const STRUCTURED_DATA_SELECTOR: &str = "script#product_structured_data";

/// Extracts review records from a product page
///
/// # Arguments
///
/// * `html` - The product page body
/// * `product_url` - The page URL, copied into every record
///
/// # Returns
///
/// One record per review; empty when the page has no structured payload or
/// the payload is not valid JSON.
///
/// # Example
///
/// ```
/// use review_harvester::extract::extract_reviews;
///
/// let html = r#"<html><body>
/// <script id="product_structured_data" type="application/ld+json">
/// {"sku": "A1", "name": "Cream", "review": [{"reviewBody": "Great"}]}
/// </script></body></html>"#;
/// let reviews = extract_reviews(html, "https://shop.example/p/cream");
/// assert_eq!(reviews.len(), 1);
/// ```
pub fn extract_reviews(html: &str, product_url: &str) -> Vec<Record> {
    let Some(payload) = find_structured_payload(html) else {
        tracing::info!("No product data found for {}", product_url);
        return Vec::new();
    };

    let product: Value = match serde_json::from_str(&payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Malformed product data for {}: {}", product_url, e);
            return Vec::new();
        }
    };

    reviews_from_product(&product, product_url)
}

/// Returns the text of the structured-data script, if present
fn find_structured_payload(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(STRUCTURED_DATA_SELECTOR).ok()?;

    document
        .select(&selector)
        .next()
        .map(|script| script.text().collect::<String>())
        .filter(|text| !text.trim().is_empty())
}

/// Maps a JSON-LD product object to review records
pub fn reviews_from_product(product: &Value, product_url: &str) -> Vec<Record> {
    let sku = product.get("sku").map(FieldValue::from_json).unwrap_or(FieldValue::Null);
    let product_name = product.get("name").and_then(name_of);
    let brand = product.get("brand").and_then(name_of);

    // A single review may be inlined as an object instead of a list
    let reviews: Vec<&Value> = match product.get("review") {
        Some(Value::Array(list)) => list.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    };

    reviews
        .into_iter()
        .map(|review| {
            let body = review
                .get("reviewBody")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let rating = review
                .get("reviewRating")
                .and_then(|r| r.get("ratingValue"))
                .map(FieldValue::from_json)
                .unwrap_or(FieldValue::Null);

            Record::new()
                .with("review_id", synthetic_id(body))
                .with("product_sku", sku.clone())
                .with("product_name", product_name.clone())
                .with("brand", brand.clone())
                .with("author", review.get("author").and_then(name_of))
                .with("title", review.get("name").and_then(name_of))
                .with("body", review.get("reviewBody").and_then(Value::as_str))
                .with("rating", rating)
                .with(
                    "date_published",
                    review.get("datePublished").and_then(Value::as_str),
                )
                .with("product_url", product_url)
        })
        .collect()
}

/// A JSON-LD name: either a plain string or an object with a `name`
fn name_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
