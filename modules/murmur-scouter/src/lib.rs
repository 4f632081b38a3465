pub mod capability;
pub mod dispatch;
pub mod ingress;
pub mod listeners;
pub mod sink;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use capability::{CapabilityRegistry, SearchCapability};
pub use dispatch::DispatchPipeline;
pub use ingress::TaskIngress;
pub use sink::ResultSink;
