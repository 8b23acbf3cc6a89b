pub mod analyser;
pub mod decoder;
pub mod element;
pub mod gesture;
pub mod registry;
pub mod ring;
pub mod scope;

pub use analyser::{AnalyserHandle, AnalyserOptions};
pub use element::{AutoplayPolicy, ElementFactory, MediaElement, MediaSrc, OutputElementFactory};
pub use gesture::GestureLatch;
pub use registry::AnalyserRegistry;
pub use scope::{EnergyBands, ScopeFeed, ScopeFrame};
