pub mod detector;
pub mod fusion;
pub mod gate;
pub mod throttle;
