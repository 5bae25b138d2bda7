//! CLI commands

mod digest;
mod history;
mod init;
mod run;

pub use digest::DigestCommand;
pub use history::HistoryCommand;
pub use init::InitCommand;
pub use run::RunCommand;
