pub mod capture;
pub mod command_queue;
pub mod device_list;
pub mod event;
pub mod manager;
pub mod notifier;
pub mod render;
pub mod stream;
pub(crate) mod worker;
