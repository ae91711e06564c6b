//! Orchestration core for distributed-systems correctness tests
//!
//! Drives a cluster of nodes through a scripted workload mixed with
//! induced failures, records every client invocation and completion
//! into a totally-ordered history, and hands that history to a
//! checker. Databases, clients, workloads, fault injectors and
//! checkers plug in as trait objects; the crate owns the lifecycle
//! around them: session pool, OS and DB stages, worker and nemesis
//! supervision, history aggregation and persistence.

pub mod barrier;
pub mod checker;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod generator;
pub mod history;
pub mod nemesis;
pub mod os;
pub mod runner;
pub mod session;
pub mod store;
pub mod trace;
pub mod worker;

/// Test doubles shared by the crate's own suites and downstream tests.
pub mod testing;

pub use barrier::PhaseBarrier;
pub use checker::{check_safely, CheckResult, Checker, Model, NoModel, Valid};
pub use client::{Client, ClientError, ClientFactory};
pub use config::{RemoteCredentials, TestConfig, TestRun};
pub use db::{Db, LogFiles, NoopDb, Primary};
pub use error::HarnessError;
pub use generator::Generator;
pub use history::{ActiveHistories, History, Op, OpKind, Process};
pub use nemesis::{Nemesis, NoopNemesis};
pub use os::{NoopOs, Os};
pub use runner::{run, run_case};
pub use session::{Session, SessionError, SessionFactory};
pub use store::{Store, TestReport};
