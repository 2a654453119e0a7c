pub mod aggregate;
pub mod broadcaster;
pub mod cache_store;
pub mod object_store;
pub mod reconciler;
pub mod roster_cache;
pub mod scheduler;
pub mod snapshot_sync;
pub mod tracking;
pub mod train_locks;
pub mod trains_list;
