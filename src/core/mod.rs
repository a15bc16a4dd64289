pub mod etl;
pub mod identifier;
pub mod loader;
pub mod normalize;
pub mod projector;
pub mod reconcile;
pub mod watermark;

pub use crate::domain::ports::{Pipeline, Storage};
pub use crate::utils::error::Result;
