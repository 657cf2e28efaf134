pub mod channel;
pub mod dispatch;
pub mod events;
pub mod gate;

pub use channel::CorrelatedChannel;
pub use dispatch::{CommandRelay, PERMISSION_DENIED_ERROR};
pub use events::{EventBus, RelayEvent};
pub use gate::PermissionGate;
