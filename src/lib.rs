//! lrcd: a daemon that watches the MPRIS session bus, fetches time-synced
//! lyrics for the playing track, and publishes the current line downstream.

pub mod cache;
pub mod config;
pub mod controller;
pub mod matcher;
pub mod models;
pub mod mpris;
pub mod providers;
pub mod publishers;
pub mod utils;
