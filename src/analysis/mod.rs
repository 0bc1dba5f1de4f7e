//! Second-opinion plumbing around an external judgment provider.

pub mod budget;
pub mod cache;
pub mod client;
pub mod desk;
pub mod usage;

pub use client::{HttpJudge, JudgmentProvider};
pub use desk::{DeskConfig, SecondOpinionDesk};
pub use usage::UsageSnapshot;
