//! Authentication: token issuing, identity verification and password hashing

pub mod identity;
pub mod password;
pub mod token;
pub mod user;

// Re-export main components
pub use identity::{IdentityService, JwtIdentityService, VerifiedIdentity};
pub use token::{Claims, TokenClass, TokenManager, TokenPair};
pub use user::User;
