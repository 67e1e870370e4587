pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::MemoryRentalStore;
pub use pool::{create_pool, run_migrations};
pub use postgres::PgRentalStore;
pub use store::RentalStore;
