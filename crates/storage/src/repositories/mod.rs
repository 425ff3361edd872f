pub mod observation_repo;
pub mod target_repo;

pub use observation_repo::{ObservationRepository, PriceStats};
pub use target_repo::{TargetRecord, TargetRepository};
