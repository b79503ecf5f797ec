pub mod browser;
pub mod dates;
pub mod mail;
pub mod portal;
pub mod print;
