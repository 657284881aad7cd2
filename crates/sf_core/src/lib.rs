pub mod field;
pub mod motion;
pub mod time;

pub use field::{project, Direction, Extent, ScreenRect, StarSpec, Starfield, Viewport};
pub use motion::{MotionController, PanDirection};
pub use time::FrameClock;
