pub mod catalog;
pub mod renderer;

pub use catalog::RendererCatalog;
pub use renderer::{RenderInput, Renderer};
