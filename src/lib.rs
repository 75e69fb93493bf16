//! Remote-driven grid and spreadsheet import for a person/interaction directory.

pub mod config;
pub mod domain;
pub mod infra;
pub mod ui;
pub mod usecase;

#[cfg(test)]
mod test_support;
