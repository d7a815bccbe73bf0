pub mod catalog;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod loader;
pub mod shape;
pub mod validator;

pub use domain::{Column, DashboardSpec, FileType, MetricSpec, Record, Schema, VisualizationKind};
pub use engine::{parse_file_type, DataEngine};
pub use error::EngineError;
pub use loader::Dataset;
pub use shape::{shape_chat, shape_metric, ChatPayload, MetricPayload, CHAT_ROW_LIMIT};
pub use validator::{validate, Rejection, TABLE_NAME};
