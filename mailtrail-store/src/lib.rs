pub mod backends;
pub mod config;
pub mod error;
pub mod gateway;
pub mod record;

pub use backends::{FileStore, MemoryStore, TestStore};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use gateway::{DeliveryRepository, DirectInsert, PersistPath, PersistenceGateway};
pub use record::{DELIVERY_TABLE, DeliveryRecord, DeliveryRow};
