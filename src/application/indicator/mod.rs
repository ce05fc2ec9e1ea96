pub mod candle_store;
pub mod indicators;
pub mod server;
pub mod snapshot_builder;

pub use candle_store::CandleStore;
pub use indicators::TechnicalIndicators;
pub use server::IndicatorServer;
pub use snapshot_builder::SnapshotBuilder;
