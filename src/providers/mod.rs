//! Thin clients for the external sources candidates and prices come from. Each one only
//! builds URLs and decodes responses; ranking and fallbacks live in `resolve` and `pricing`.

pub mod archive;
pub mod mediawiki;
pub mod pricecharting;
pub mod thumbnails;
pub mod wikidata;

pub use archive::Archive;
pub use mediawiki::MediaWiki;
pub use pricecharting::PriceCharting;
pub use thumbnails::Thumbnails;
pub use wikidata::Wikidata;
