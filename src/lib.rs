pub mod app;
pub mod settings;
pub mod speedtest;
pub mod ui;
