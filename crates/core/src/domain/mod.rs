pub mod emotion;
pub mod knowledge;
pub mod message;
pub mod status;
pub mod user;
