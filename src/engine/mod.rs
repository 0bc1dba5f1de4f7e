pub mod arbitrage;
pub mod blend;
pub mod estimate;
pub mod kelly;
pub mod portfolio;
pub mod scoring;
pub mod screening;
pub mod validation;

pub use kelly::SizingConfig;
pub use portfolio::{CorrelationPolicy, RankBy};
pub use screening::{Judgments, ScreeningConfig, ScreeningEngine};
pub use validation::ValidationThresholds;
