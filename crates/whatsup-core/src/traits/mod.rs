//! Trait seams between the bot engine and its external collaborators.

pub mod search;
pub mod transport;

pub use search::Searcher;
pub use transport::Transport;
