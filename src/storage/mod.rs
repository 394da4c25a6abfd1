mod articles;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{Article, DatabaseError, Feed, NewFeed, ParsedArticle};
