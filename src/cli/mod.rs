pub mod price;
pub mod setup;
pub mod summary;
pub mod ui;
pub mod watch;
