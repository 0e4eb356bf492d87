pub mod forecast;
pub mod intent;
pub mod message;
pub mod session;
