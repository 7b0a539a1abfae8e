//! Offline-first synchronization with the glucose backend.

pub mod engine;
pub mod fake;
pub mod http;
pub mod merge;
pub mod remote;
pub mod single_flight;
pub mod timestamp;

pub use engine::{
    CreatedReading, PullSummary, PushState, PushSummary, SyncEngine, SyncEngineBuilder,
    SyncOutcome, SyncSummary,
};
pub use http::HttpRemoteService;
pub use merge::{MergeOptions, MergeReport};
pub use remote::{ProfileRefresher, RemoteCreate, RemoteError, RemoteService};
pub use single_flight::SingleFlight;
pub use timestamp::RemoteClock;
