mod claims;
pub mod extractors;
pub mod jwt;
pub mod password;

pub use extractors::{decode_auth_token, AuthUser, StaffUser};
pub use jwt::JwtKeys;
