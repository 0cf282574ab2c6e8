pub mod channel;
pub mod controller;
pub mod global;
pub mod manual;
pub mod polling;
pub mod process_tracker;
pub mod source;
pub mod state;
pub mod subscription;

pub use channel::{Delivery, DeliveryChannel, EventCallback, UserData, WaitOutcome, WakeSignal};
pub use controller::MonitorController;
pub use manual::{FailurePoint, ManualSource, SourceCall};
pub use polling::SystemSource;
pub use process_tracker::{ProcessChanges, ProcessTracker};
pub use source::{
    InstrumentationSource, NotificationKind, NotificationQuery, NotificationSink, RawInstance,
    RawText, RegistrationId, SourceConnection, SourceError, SourceRuntime, TargetInstance,
};
pub use subscription::{normalize, NotificationSubscription};
