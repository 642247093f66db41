#![doc = include_str!("../README.md")]

mod error;

pub mod calibration;
pub mod catalog;
pub mod config;
pub mod geolocation;
pub mod handle;
pub mod matcher;
pub mod pattern;
pub mod product;
pub mod reader;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod section;

pub use error::{Error, Result};
