//! Repository layer over the SQLite pool.

mod candidates;
mod canonical;
mod clusters;
mod instances;

pub use candidates::CandidateRepository;
pub use canonical::CanonicalRepository;
pub use clusters::ClusterRepository;
pub use instances::InstanceRepository;
