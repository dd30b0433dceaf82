//! Database module for PostgreSQL persistence.

mod categories;
mod inventory;
mod orders;
mod pool;
mod products;

pub use categories::*;
pub use inventory::*;
pub use orders::*;
pub use pool::*;
pub use products::*;
