//! Session and credential lifecycle
//!
//! Components, leaves first:
//! - Token signing and validation (`jwt`)
//! - Password hashing with Argon2 (`password`)
//! - Storage traits with PostgreSQL and in-memory backends
//!   (`repository`, `memory`)
//! - Refresh token bookkeeping by digest (`store`)
//! - Identity resolution and third-party token verification
//!   (`identity`, `external`)
//! - The session manager tying them together (`session`)
//! - Transport helpers: refresh cookie and bearer middleware

pub mod cookie;
pub mod external;
pub mod identity;
pub mod jwt;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod repository;
pub mod session;
pub mod store;

pub use cookie::{read_refresh_cookie, RefreshCookie, REFRESH_COOKIE, REFRESH_COOKIE_PATH};
pub use external::{GoogleIdentityVerifier, IdentityVerifier, VerifierError};
pub use identity::{IdentityError, IdentityResolver};
pub use jwt::{AccessClaims, JwtConfig, JwtError, RefreshClaims, TokenSigner};
pub use memory::{MemoryRefreshTokenRepository, MemoryUserRepository};
pub use middleware::{auth_middleware, AuthError, AuthenticatedUser};
pub use models::{RefreshTokenRecord, User, UserPublic};
pub use password::PasswordConfig;
pub use repository::{
    PgRefreshTokenRepository, PgUserRepository, RefreshTokenRepository, RepositoryError,
    UserRepository,
};
pub use session::{AuthSession, SessionError, SessionManager, TokenPair};
pub use store::CredentialStore;
