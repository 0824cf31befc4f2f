pub mod codec;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod server;
