//! vmforge - step-pipeline image builder for Hyper-V virtual machines.
//!
//! A build is an ordered list of [`pipeline::Step`]s run against a shared
//! [`pipeline::StateBag`]. Steps talk to the host through a [`driver::Driver`]
//! and, once the guest is reachable, to the guest through a
//! [`communicator::Communicator`].
//!
//! ```ignore
//! let config: BuildConfig = serde_json::from_str(&raw)?;
//! let builder = Builder::new(config)?;
//! let artifact = builder.run(Arc::new(ConsoleUi::new())).await?;
//! println!("{}", artifact);
//! ```

pub mod builder;
pub mod communicator;
pub mod driver;
pub mod pipeline;
pub mod ui;
mod util;

pub use builder::{Artifact, BuildConfig, Builder};
pub use vmforge_shared::{VmforgeError, VmforgeResult};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `default_level` when set. With `log_dir`, events are
/// also written to `<log_dir>/vmforge.log`; keep the returned guard alive for
/// the process lifetime so buffered lines get flushed.
pub fn init_logging(
    default_level: &str,
    log_dir: Option<&Path>,
) -> VmforgeResult<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                VmforgeError::Storage(format!(
                    "Failed to create log directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::never(dir, "vmforge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| VmforgeError::Internal(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}
