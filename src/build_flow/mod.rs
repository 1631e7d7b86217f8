pub mod action;
pub mod changes;
pub mod component;
pub mod events;
pub mod graph;
pub mod manifest;
pub mod pool;
pub mod scheduler;

pub use action::{BuildAction, BuildCtx, FnBuildAction, LoggingBuildAction};
pub use changes::ChangeTracker;
pub use component::Component;
pub use events::{BufferingEventSink, BuildEvent, BuildEventEnvelope, EventSink, LoggingEventSink};
pub use graph::{DependencyGraph, GraphData, GraphDataLink, GraphDataNode};
pub use manifest::{BuildManifest, ComponentSpec, ManifestParts};
pub use pool::{ShutdownStatus, WorkerPool};
pub use scheduler::{BuildReport, BuildScheduler, BuildSchedulerBuilder, NodeOutcome, NodeReport};
