pub mod conversation;
pub mod media_group;
pub mod messages;
pub mod throttle;
pub mod update_router;

pub use conversation::{ConversationEngine, Route};
pub use media_group::MediaGroupHandle;
pub use throttle::ThrottleHandle;
pub use update_router::{UpdateDispatcher, UpdateRouterHandle};
