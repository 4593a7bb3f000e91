//! Background Tasks Module
//!
//! Contains the tasks that run for the lifetime of an engine.
//!
//! # Tasks
//! - Worker pool: serves operations handed to `Engine::enqueue_operation`

mod worker;

pub(crate) use worker::spawn_worker_pool;
