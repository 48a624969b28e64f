pub mod oeminfo;
pub mod update_app;
