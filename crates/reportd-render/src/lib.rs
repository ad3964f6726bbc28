//! `reportd-render`: client side of the dashboard render service.

pub mod error;
pub mod http;
pub mod renderer;

pub use error::RenderError;
pub use http::HttpRenderer;
pub use renderer::{RenderOutput, RenderRequest, Renderer};
