pub mod action;
pub mod profile;
pub mod request;
