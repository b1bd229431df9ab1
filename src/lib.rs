pub mod config;
pub mod error;
pub mod keychain;
pub mod keysetup;
pub mod logging;
pub mod output;
pub mod remote;
pub mod ssh;
pub mod state;
pub mod transfer;
pub mod ui;

pub use error::{AppError, AppResult};
pub use state::AppState;
