pub mod constants;
pub mod session;
pub mod store;

pub use session::{Coordinator, CoordinatorError, Status, TabTransport};
pub use store::{FlowStore, InMemoryFlowStore};
