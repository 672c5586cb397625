//! Database module for the dataset catalog
//!
//! This module provides the SQLite-backed metadata repository

pub mod metadata_repo;

pub use metadata_repo::{MetadataRepository, METADATA_TABLE};
