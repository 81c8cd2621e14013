//! # Whatsup Tools
//! Lookups the bot can run on a user's behalf outside of URL watching.

pub mod web_search;

pub use web_search::DuckDuckGoSearch;
