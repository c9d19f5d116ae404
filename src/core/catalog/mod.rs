mod parser;
mod tree;

pub use parser::{capitalize_first, CatalogParser};
pub use tree::Catalog;
