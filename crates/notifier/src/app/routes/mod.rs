pub mod notifications;
pub mod system;
