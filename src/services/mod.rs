//! Case and user services. Both hold the pool they were built with.

pub mod cases;
pub mod sections;
pub mod users;
