pub mod metadata;
pub mod wav_header;
pub mod wav_reader;
pub mod wav_writer;
