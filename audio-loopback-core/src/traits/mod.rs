pub mod audio_client;
pub mod backend;
pub mod listener;
