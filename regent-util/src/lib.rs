pub mod misc;
pub mod time;

pub use misc::*;
pub use time::*;
