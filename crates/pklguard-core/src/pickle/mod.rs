pub mod opcodes;
pub mod read;
pub mod stream;
