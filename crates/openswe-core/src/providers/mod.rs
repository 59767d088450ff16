//! Built-in container providers.

mod docker;
mod local;

pub use docker::DockerProvider;
pub use local::LocalProvider;
