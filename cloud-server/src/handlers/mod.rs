//! HTTP handlers

pub mod health;
pub mod collections;
pub mod entries;
pub mod labels;
pub mod jobs;
