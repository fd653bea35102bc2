/// Authentication primitives
///
/// # Modules
///
/// - [`jwt`]: HS256 access/refresh tokens carrying tenant, role and an
///   optional permission snapshot
/// - [`api_key`]: tenant-scoped integration keys (generation, hashing, scopes)
/// - [`revocation`]: logout and principal-wide token revocation over the
///   shared store
///
/// Authorization (what an authenticated principal may do) lives in
/// [`crate::authz`].

pub mod api_key;
pub mod jwt;
pub mod revocation;

pub use jwt::{Claims, JwtError, TokenType};
pub use revocation::TokenRevocation;
