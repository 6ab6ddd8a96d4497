// src/lib.rs
pub mod api;
pub mod assignment;
pub mod calendar;
pub mod closure;
pub mod config;
pub mod consolidation;
pub mod export;
pub mod model;
pub mod normalizer;
pub mod store;
pub mod vehicle;

#[cfg(test)]
mod consolidation_tests;
#[cfg(test)]
mod test_support;
