pub mod delegation;
pub mod flow;
pub mod request;
pub mod task;
