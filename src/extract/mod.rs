//! Item extraction
//!
//! Turns fetched bodies into flat records:
//! - Product pages with embedded structured data into review records
//! - Reddit API objects into post and comment records
//! - Catalog listing pages into product URLs
//!
//! Extraction is eager and never fails a job: a page without the expected
//! payload yields no records.

mod listing;
mod record;
pub mod reddit;
mod reviews;

pub use listing::{extract_product_links, ListingPage};
pub use record::{synthetic_id, FieldValue, Record, TIMESTAMP_FORMAT};
pub use reddit::{COMMENTS_ENTITY, POSTS_ENTITY};
pub use reviews::{extract_reviews, reviews_from_product, REVIEWS_ENTITY};
