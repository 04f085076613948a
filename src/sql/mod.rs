//! PostgreSQL dialect: statement rendering, DDL and identifier quoting

pub mod ddl;
pub mod render;
pub mod sanitize;

pub use ddl::DdlGenerator;
pub use render::{Param, Statement, render};
pub use sanitize::{POSTGRES_RESERVED_WORDS, quote_identifier, quote_qualified, validate_identifier};
