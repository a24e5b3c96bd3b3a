#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate lazy_static;

pub mod api;
pub mod cache_db;
pub mod config;
pub mod directions;
pub mod directions_codec;
pub mod error;
pub mod gps_processor;
pub mod logs;
pub mod main_db;
pub mod recorder;
pub mod route;
pub mod route_engine;
pub mod storage;
pub mod utils;
