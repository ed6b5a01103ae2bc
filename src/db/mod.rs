pub mod connection;
pub mod identifier;

pub use connection::ConnectionProvider;
pub use identifier::{quote_column, TableName};
