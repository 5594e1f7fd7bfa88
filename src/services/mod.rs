pub mod blob_session;
pub mod bucket_registry;
pub mod chunk_store;
