pub use self::push::{
    Claims, NotificationMessage, PushHeader, Registration, Unregistration,
    Urgency,
};

mod push;
