pub mod connection;
pub mod notification;

pub use connection::*;
pub use notification::*;
