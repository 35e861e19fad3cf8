pub mod chat;
pub mod speech;
