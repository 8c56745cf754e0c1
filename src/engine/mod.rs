//! Core engine: the per-session scan → score → decide → buy loop.

pub mod accountant;
pub mod executor;
pub mod guard;
pub mod manager;
pub mod portfolio;
pub mod scanner;
pub mod session;

pub use guard::{BudgetGuard, BudgetLimits, Denial};
pub use manager::SessionManager;
pub use portfolio::{Holding, Portfolio, PortfolioStats, PortfolioSummary};
pub use session::{EngineDeps, EngineOptions, EngineStatus, RuntimeSettings, SniperEngine};
