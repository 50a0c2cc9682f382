pub mod config;
pub mod credentials;
pub mod error;
pub mod feed;
pub mod order;
pub mod push;
pub mod session;
pub mod telemetry;

pub use config::{ClientSettings, ConfigError};
pub use credentials::{AuthRecord, CredentialBundle, CredentialStore, UserProfile};
pub use error::{ClientError, FeedError};
pub use feed::{classify, FeedCommand, FeedEvent, FeedState, FeedStatus, Lane, OrderFeed};
pub use order::{Order, OrderItem, OrderStatus, RecordId, TableRef};
pub use push::LiveOrderFeed;
pub use session::{AuthResponse, SessionClient, SessionEvent, SessionState};
