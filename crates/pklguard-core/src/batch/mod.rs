pub mod driver;
pub mod fetch;
pub mod gate;
