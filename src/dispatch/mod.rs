mod backend;
mod coordinator;
mod resolver;

pub use backend::{ActionDecision, BackendClient};
pub use coordinator::DispatchCoordinator;
