//! Edge gateway middleware

pub mod admission;
pub mod principal;

pub use admission::AdmissionMiddleware;
pub use principal::{AuthRequirement, PrincipalMiddleware};
