pub mod app;
pub mod assets;
pub mod camera3d;
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod lifecycle;
pub mod mesh;
pub mod model_config;
pub mod picker;
pub mod raycast;
pub mod renderer;
pub mod resolver;
pub mod scene;
pub mod sync;
pub mod texture_cache;
pub mod time;
pub mod upload;
pub mod zone;

pub use app::{run, run_with_overrides, App, ConfiguratorSession};
