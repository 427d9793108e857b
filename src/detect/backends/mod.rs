pub mod heuristic;
pub mod scripted;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use heuristic::{HeuristicFaceBackend, HeuristicTextBackend};
pub use scripted::ScriptedBackend;
pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
