pub mod candle_repository;
pub mod performance_snapshot_repository;
pub mod playbook_repository;
pub mod reflection_repository;
pub mod research_cache_repository;
pub mod risk_rejection_repository;
pub mod screener_log_repository;
pub mod trade_repository;

pub use candle_repository::PgCandleRepository;
pub use performance_snapshot_repository::PgPerformanceSnapshotRepository;
pub use playbook_repository::PgPlaybookRepository;
pub use reflection_repository::PgReflectionRepository;
pub use research_cache_repository::PgResearchCacheRepository;
pub use risk_rejection_repository::PgRiskRejectionRepository;
pub use screener_log_repository::PgScreenerLogRepository;
pub use trade_repository::PgTradeRepository;
