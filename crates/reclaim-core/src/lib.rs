pub mod commands;
pub mod config;
pub mod gc;
pub mod index;
pub mod platform;
pub mod repo;
pub mod set;
pub mod snapshot;
pub mod storage;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
