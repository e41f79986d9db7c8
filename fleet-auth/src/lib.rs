//! External auth/rate-limit collaborators (spec §6): `UserResolver`
//! (client session → `UserId`), `AuthorizedAgent` (agent-key header →
//! registered `Agent`), and `RateLimiter`.

pub mod agent_key;
pub mod rate_limit;
pub mod resolver;

pub use agent_key::AuthorizedAgent;
pub use rate_limit::{Decision, RateLimiter, Rule};
pub use resolver::{AuthUser, SessionAuth, UserResolver, SESSION_COOKIE, SESSION_HEADER};
