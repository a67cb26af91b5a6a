pub mod academics;
pub mod classes;
pub mod core;
pub mod promotions;
