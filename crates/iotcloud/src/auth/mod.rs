//! Token authorization via OAuth introspection.

mod config;
mod error;
mod introspect;

pub use config::{AuthConfig, ClientCredentials};
pub use error::AuthError;
pub use introspect::{
    RemoteIntrospector, SessionClass, TokenIntrospector, UserInfo, authorize,
};
