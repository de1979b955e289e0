pub mod declarations;
pub mod scrape;
