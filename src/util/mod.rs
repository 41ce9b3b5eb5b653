//! Shared utilities

pub mod cancel;
pub mod config;
pub mod context;
pub mod diagnostic;
pub mod fs;
pub mod hash;
pub mod interning;
pub mod process;
pub mod shell;
pub mod workdir;

pub use cancel::CancelToken;
pub use config::Config;
pub use context::GlobalContext;
pub use diagnostic::Diagnostic;
pub use interning::InternedString;
pub use shell::Shell;
