pub mod authenticate;
pub mod connection;
pub mod event;
pub mod jwt_hook;

pub use authenticate::*;
pub use connection::*;
pub use event::*;
pub use jwt_hook::*;
