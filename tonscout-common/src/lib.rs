pub mod bot_commands;
pub mod state;
pub mod tgbot;
pub mod utils;

pub use teloxide;
