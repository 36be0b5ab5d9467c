//! HTTP intake service for phone-number recognition jobs, plus the wiring
//! shared by the API and worker binaries.

pub mod app;
