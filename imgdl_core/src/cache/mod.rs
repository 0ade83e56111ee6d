pub mod result_cache;
pub mod store;
pub mod task_registry;
