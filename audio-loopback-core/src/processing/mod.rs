pub mod circular_buffer;
pub mod sample_codec;
pub mod sample_queue;
pub mod tone_generator;
pub mod wave_generator;
