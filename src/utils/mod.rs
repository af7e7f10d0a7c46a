pub mod holidays;
pub mod time;
pub mod token;
