pub mod led;
pub mod req;
