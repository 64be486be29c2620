pub mod retry;
pub mod time;
pub mod token;
