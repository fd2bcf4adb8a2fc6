//! Protocol adapters (Component B): one implementation of `Adapter` per
//! wire protocol family. Torznab/Newznab/Jackett/Prowlarr share a feed
//! format and therefore one adapter; RSS and the Cardigann-derived
//! direct-scraper each get their own.

pub mod html;
pub mod rss;
pub mod torznab;

pub use html::HtmlAdapter;
pub use rss::RssAdapter;
pub use torznab::TorznabAdapter;
