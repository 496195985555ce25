//! Remote catalog access: platforms, collections and game records

mod client;
mod model;

pub use client::{
    CatalogClient, Session, FAVORITES_COLLECTION_NAME, FULL_CATALOG_TIMEOUT, LISTING_LIMIT,
    METADATA_TIMEOUT, PLATFORM_LISTING_TIMEOUT,
};
pub use model::{CatalogRecord, Collection, Platform, MULTIPLAYER_PLAYER_COUNT};
