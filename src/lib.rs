#![allow(dead_code)]

pub mod context;
pub mod directives;
pub mod document;
pub mod error;
pub mod expr;
pub mod hash;
pub mod objectstore;
pub mod objectstore_demo;
pub mod output;
pub mod processor;
pub mod provisioner;
pub mod transaction;

pub use context::Context;
pub use document::Node;
pub use error::CfnPlusError;
pub use processor::{process_template, ParamInput, TemplateResult};
pub use transaction::TransactionDriver;
