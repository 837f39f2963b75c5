/*!
Track RFID-tagged objects entering and leaving a detection zone.

Scanning a tag toggles it: the first read reports the tag entering the
zone, the next read reports it leaving. Whenever a tag leaves, a countdown
starts; if the tag does not return before its configured timeout, an
absence alert is emitted. Events fan out to pluggable sinks (terminal,
text log, JSON, SQLite, webhook) and the registry of known tags persists
across restarts.

The binary in `main.rs` wires a stdin scan feed to the tracker. Embedders
use the library directly:

```no_run
use std::time::Duration;
use tagwatch::core::config::{StoreBackend, TrackerConfig};
use tagwatch::ZoneTracker;

#[tokio::main]
async fn main() -> tagwatch::TrackerResult<()> {
    let mut config = TrackerConfig::default();
    config.registry.store = StoreBackend::Memory;

    let (tracker, handle) = ZoneTracker::new(config).await?;
    let task = tracker.spawn();

    handle.scan("04A1B2C3").await?; // enters the zone
    handle.rename("04A1B2C3", "Box A").await?;
    handle.set_timeout("04A1B2C3", Duration::from_secs(600)).await?;
    handle.scan("04A1B2C3").await?; // leaves; countdown starts

    handle.shutdown().await?;
    task.await.map_err(|_| tagwatch::TrackerError::MailboxClosed)??;
    Ok(())
}
```
*/

pub mod core;
pub mod error;
pub mod store;

// Re-export the main types for convenient library use
pub use crate::core::config::TrackerConfig;
pub use crate::core::events::{EventKind, TagEvent};
pub use crate::core::registry::{TagId, TagRecord, TagRegistry};
pub use crate::core::scan_feed::{channel_feed, console_feed, line_feed, ScanInjector};
pub use crate::core::sinks::{EventSink, SinkManager};
pub use crate::core::timers::{TimerFire, TimerSupervisor};
pub use crate::core::tracker::{
    AutoRegistrar, NewTag, Registrar, TrackerHandle, TrackerSnapshot, TrackerStats, ZoneTracker,
};
pub use crate::error::{TrackerError, TrackerResult};
pub use crate::store::{JsonFileStore, MemoryStore, RegistryStore, SqliteStore};
