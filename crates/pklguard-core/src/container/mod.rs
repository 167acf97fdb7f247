pub mod archive;
pub mod keras;
