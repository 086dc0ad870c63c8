pub mod alias;
pub mod flow_control;
pub mod state;
pub mod store;
pub mod subscription;

pub use alias::{AliasAssignment, TopicAliasManager};
pub use flow_control::FlowControl;
pub use state::SessionState;
pub use store::{FileSessionStore, SessionSnapshot, SessionStore};
pub use subscription::{SubscriptionEntry, SubscriptionRegistry};
