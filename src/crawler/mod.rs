//! # Crawler Module
//!
//! Implements the crawling engine that drives admission and fetching.
//!
//! ## Overview
//!
//! The `Crawler` owns a pool of worker tasks. Each worker asks the
//! `AdmissionController` for the next resource it may scrape, hands it to the
//! `Fetcher`, queues discovered links and reports the outcome back to both the
//! work queue and the controller. Workers that are turned away by a level limit
//! wait for the controller's check interval before asking again.
//!
//! ## Internal Components
//!
//! These are implementation details and are not typically used directly:
//! - `WorkerContext`: the handles shared by every worker of one crawl
//! - `run_worker`: the dispatch loop of a single worker task

mod core;
mod worker;

pub use core::Crawler;
