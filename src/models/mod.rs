pub mod item;
pub mod page;
pub mod query;
pub mod requester;
pub mod status;
pub mod transaction;

pub use item::*;
pub use page::*;
pub use query::*;
pub use requester::*;
pub use status::*;
pub use transaction::*;
