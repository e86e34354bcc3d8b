//! Product links from catalog listing pages
//!
//! A listing page shows a grid of product cards. Each card links to its
//! product page; links whose path contains `/p/` are product pages, the rest
//! (wishlist buttons, brand pages) are ignored.

use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

/// Product cards and links found on one listing page
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Number of product-card containers on the page
    pub cards: usize,

    /// Absolute product URLs, deduplicated, in document order
    pub links: Vec<String>,
}

impl ListingPage {
    /// A page without product cards marks the end of the catalog
    pub fn is_empty(&self) -> bool {
        self.cards == 0
    }
}

/// Parses a listing page into product cards and product links
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` inside a product-card container
///
/// **Exclude:**
/// - Links whose path does not contain `/p/`
/// - `javascript:`, `mailto:`, `tel:` and data URIs
/// - Fragment-only links
///
/// # Arguments
///
/// * `html` - The listing page body
/// * `page_url` - The page URL, for resolving relative links
/// * `card_selector` - CSS selector of a product-card container
///
/// # Returns
///
/// * `Ok(ListingPage)` - Cards and links found (possibly none)
/// * `Err(String)` - The card selector does not parse
///
/// # Example
///
/// ```
/// use review_harvester::extract::extract_product_links;
/// use url::Url;
///
/// let html = r#"<div class="card"><a href="/p/night-cream/">Night Cream</a></div>"#;
/// let page_url = Url::parse("https://shop.example/skin-care.html?p=1").unwrap();
/// let page = extract_product_links(html, &page_url, "div.card").unwrap();
/// assert_eq!(page.links, vec!["https://shop.example/p/night-cream/"]);
/// ```
pub fn extract_product_links(
    html: &str,
    page_url: &Url,
    card_selector: &str,
) -> Result<ListingPage, String> {
    let cards_selector = Selector::parse(card_selector)
        .map_err(|e| format!("Invalid product selector '{}': {}", card_selector, e))?;
    let link_selector =
        Selector::parse("a[href]").map_err(|e| format!("Invalid link selector: {}", e))?;

    let document = Html::parse_document(html);
    let mut page = ListingPage::default();
    let mut seen = BTreeSet::new();

    for card in document.select(&cards_selector) {
        page.cards += 1;

        for anchor in card.select(&link_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(url) = resolve_link(href, page_url) else {
                continue;
            };
            if is_product_url(&url) && seen.insert(url.to_string()) {
                page.links.push(url.to_string());
            }
        }
    }

    Ok(page)
}

fn is_product_url(url: &Url) -> bool {
    url.path().contains("/p/")
}

/// Resolves a link href to an absolute HTTP(S) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only links
/// - Invalid URLs
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let url = base_url.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
