pub mod mock_interview;
pub mod user;

pub use mock_interview::*;
pub use user::UserAccount;
