/**
 * Routes Module
 * API route handlers
 */

pub mod case;
pub mod health;
pub mod user;
