pub mod catalog;
pub mod clean;
pub mod combine;
pub mod config;
mod parser;
pub mod qualify;
pub mod results;
pub mod retry;
pub mod scraper;
pub mod stats;
pub mod store;
mod table;
pub mod types;
pub mod utils;

pub use config::Config;
pub use scraper::{PageSource, WebScraper};
pub use store::StoreError;

pub(crate) const BASE_URL: &str = "https://www.ironman.com";
