pub mod heuristic;
pub mod http;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use heuristic::HeuristicDetector;
pub use http::ModelDetector;
pub use stub::{CallCounter, StubDetector};

#[cfg(feature = "backend-tract")]
pub use tract::OnnxDetector;
