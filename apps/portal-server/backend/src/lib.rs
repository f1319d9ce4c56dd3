//! The school portal's voting server: public vote casting plus the admin
//! back office for the election, its tokens and its reports.

pub mod app;
pub mod config;
pub mod log;
pub mod seed;
mod session;
mod state;
