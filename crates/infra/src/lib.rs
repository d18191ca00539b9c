//! Infrastructure layer: event store, dispatch pipeline, read models,
//! collaborator ports, configuration and the field-collection service.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod pipeline;
pub mod ports;
pub mod projections;
pub mod read_model;
pub mod service;

mod integration_tests;

pub use self::config::AppConfig;
pub use service::{CollectionService, InMemoryCollectionService, ReconciliationIssue, ServiceError};
