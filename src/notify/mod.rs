pub mod auth;
pub mod dispatcher;
pub mod fcm;

pub use auth::{AccessTokenSource, ServiceAccountKey, ServiceAccountTokens};
pub use dispatcher::{NotificationDispatcher, PushMessage, PushTransport, flatten_data};
pub use fcm::FcmTransport;
