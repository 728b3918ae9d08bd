mod data_channel_manager;

pub use data_channel_manager::*;
