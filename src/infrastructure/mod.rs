pub mod bus;
pub mod core;
pub mod llm;
pub mod mock;
pub mod okx;
pub mod persistence;

pub use bus::RedisBus;
pub use persistence::Database;
