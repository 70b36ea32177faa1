//! The built-in tasks of the standard pipeline.

mod clean;
mod fonts;
mod images;
mod markup;
mod resources;
mod scripts;
mod sprite;
mod styles;

pub use clean::Clean;
pub use fonts::Fonts;
pub use images::Images;
pub use markup::Markup;
pub use resources::Resources;
pub use scripts::Scripts;
pub use sprite::Sprites;
pub use styles::Styles;
