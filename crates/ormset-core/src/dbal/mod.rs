//! SQL building and execution.

mod builder;
mod connection;
mod fragment;
mod platform;

pub use builder::{Clause, Join, JoinKind, QueryBuilder};
pub use connection::{Connection, ExecutedStatement, Row, SqliteConnection};
pub use fragment::{Fragment, SqlArg};
pub use platform::Platform;
