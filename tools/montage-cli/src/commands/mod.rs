pub mod check;
pub mod export;
pub mod extract_audio;
pub mod probe;
pub mod thumbnail;
