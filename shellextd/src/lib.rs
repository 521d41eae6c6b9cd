pub mod daemon;
pub mod folders;
pub mod journal;
pub mod paths;
pub mod server;
