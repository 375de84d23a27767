pub mod error;
pub mod feed;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use error::StorageError;
pub use feed::LocalChangeFeed;
pub use sqlite::{RemoteSession, SqliteRemote};
pub use traits::*;
