pub mod ring;
pub mod window;
