pub mod credentials;
pub mod events;
pub mod images;
pub mod keystore;
pub mod providers;
pub mod runs;
pub mod themes;
