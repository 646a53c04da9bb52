//! Gradewatch Stub Backend
//!
//! A scripted, in-process implementation of the feedback endpoints consumed by
//! `gradewatch-core`. Each job serves a fixed sequence of status reports and
//! follows the backend's retry rules, which makes poller behaviour observable
//! end to end without the real grading service.

pub mod script;
pub mod server;

pub use script::{JobScript, ScriptError, StubScript};
pub use server::{create_router, serve, StubState, RETRY_ACCEPTED_MESSAGE};
