pub mod icons;
pub mod progress;

pub use progress::{TaskUI, UiMode, format_duration};
