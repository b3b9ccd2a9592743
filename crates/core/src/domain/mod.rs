pub mod agent;
pub mod conversation;
pub mod interview;
