// Credential acquisition — clearance providers and the shared, time-boxed lease.

pub mod clearance;
pub mod lease;
pub mod traits;
