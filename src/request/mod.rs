//! Normalization of inbound HTTP requests into the plain shape entity
//! functions consume, and of their resolved values back into responses.

mod normalize;
mod reply;

pub use normalize::{HttpRequest, RequestHeaders, UploadedFile};
pub use reply::{session_cookie, Reply};
