pub mod base;
pub mod client;
pub mod current;
pub mod history;
pub mod html;
