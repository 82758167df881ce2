pub mod application;
pub mod host;
pub mod runner;

pub use application::{AppOptions, Application, RouteSummary};
pub use host::HttpHost;
pub use runner::{run, RunOptions, ShutdownOptions};
