pub mod settings;

pub use settings::{load_users, Settings};
