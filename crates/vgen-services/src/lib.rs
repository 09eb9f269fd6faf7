//! Clients for the collaborators notified when a generation settles.
//!
//! Both are optional at runtime: a missing base URL disables the feature.

pub mod error;
pub mod notifications;
pub mod persistence;

pub use error::{ServiceError, ServiceResult};
pub use notifications::{HttpNotifier, NotificationConfig, Notifier};
pub use persistence::{
    AssetPersistence, HttpAssetPersistence, PersistenceConfig, SaveVideoRequest, SavedVideo,
};
