//! Errors shared by the OData crates: the RFC 9457 [`Problem`] document and
//! the [`catalog`] of definitions each layer maps its own errors onto.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod problem;

pub use catalog::ErrDef;
pub use problem::{ODataError, ODataErrorBody, ODataErrorDetail, Problem, TargetedError};
