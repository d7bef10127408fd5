pub mod color;
pub mod favorites;
pub mod models;
pub mod settings;
