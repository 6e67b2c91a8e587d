//! Request middleware

mod auth;

pub use auth::{auth_middleware, require_pdg, AuthUser, Claims, CurrentUser, PDG_ROLE};
