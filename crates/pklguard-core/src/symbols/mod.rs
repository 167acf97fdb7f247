pub mod model;
pub mod track;
