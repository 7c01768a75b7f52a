pub mod config;
pub mod error;
pub mod traits;

pub use config::AppConfig;
pub use error::{SimschedError, SimschedResult};
pub use traits::{ExecOutcome, FileMover, OutputObserver, RemoteExecutor, RemoteTarget};
