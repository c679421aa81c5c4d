//! ABOUTME: Repository layer: one module per table, narrow CRUD surfaces
//! ABOUTME: No repository depends on another; composition happens in ds_scheduler/ds_executor

pub mod executions;
pub mod executors;
pub mod jobs;
pub mod locks;
pub mod system_config;
