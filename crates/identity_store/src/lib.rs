//! Generic persistence layer for identity-server entities.
//!
//! One store implementation serves every entity kind. A kind plugs in through
//! the `Entity` trait and a static `KindDescriptor`; the store adds field-mask
//! projection, optimistic concurrency on `updated_at`, soft delete and
//! paginated finds on top.

pub mod config;
pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod store;

pub use config::{StoreOptions, UnknownFieldPolicy};
pub use context::{CancellationToken, Caller, Pagination, RequestContext};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::client::{Client, ClientIdentifiers, ClientState, GrantType};
pub use model::gateway::{Gateway, GatewayIdentifiers, GatewayVersionIdentifiers};
pub use model::ids::Eui64;
pub use model::{clean_time, Entity, EntityIdentifiers, KindDescriptor, Model, ValidationError};
pub use store::{
    client_store, gateway_store, ClientStore, EntityStore, FieldMask, FindResult, GatewayStore,
    SqliteEntityStore, StoreError, StoreResult,
};
