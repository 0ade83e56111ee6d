pub mod notifier;
pub mod observer;
